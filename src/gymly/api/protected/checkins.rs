use super::{
    AuthUser, DEFAULT_PAGE_LIMIT, PageQuery, Paginated, database,
    error::{GymlyError, GymlyResult},
    gymly_api_response,
    state::AppState,
};
use database::{
    CheckInStatus, OrderStatus, UserRole,
    entities::{CheckInModel, CheckIns, Members, Subscriptions},
    check_ins, members, orders, subscriptions,
};

use axum::{
    Json,
    body::Body,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{Response, StatusCode},
};
use chrono::{DateTime, NaiveTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, JoinType, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, RelationTrait, Set,
};
use serde::{Deserialize, Serialize};
#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

pub const NO_ACTIVE_SUBSCRIPTION: &str = "No active subscription";

/// Midnight UTC of the day `now` falls on.
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Picks the subscription that lets a member in at `now`: its window must
/// have started and must not have ended before today. The latest end wins.
/// Callers pass only subscriptions whose order is approved.
pub fn active_subscription(
    now: DateTime<Utc>,
    approved: Vec<subscriptions::Model>,
) -> Option<subscriptions::Model> {
    let today = start_of_day(now);

    approved
        .into_iter()
        .filter_map(|sub| match (sub.start_date, sub.end_date) {
            (Some(start), Some(end)) if start <= now && end >= today => Some((end, sub)),
            _ => None,
        })
        .max_by(|(a, a_sub), (b, b_sub)| a.cmp(b).then(a_sub.id.cmp(&b_sub.id)))
        .map(|(_, sub)| sub)
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CheckInRequest {
    pub member_id: Option<i32>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CheckInsQuery {
    pub status: Option<CheckInStatus>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

impl CheckInsQuery {
    fn page_query(&self) -> PageQuery {
        PageQuery {
            page: self.page,
            limit: self.limit,
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CheckInMember {
    pub id: i32,
    pub name: String,
    pub phone_number: String,
}

impl From<members::Model> for CheckInMember {
    fn from(member: members::Model) -> Self {
        Self {
            id: member.id,
            name: member.name,
            phone_number: member.phone_number,
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CheckInWindow {
    pub id: i32,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInDetail {
    #[serde(flatten)]
    pub check_in: check_ins::Model,
    pub member: CheckInMember,
    pub subscription: CheckInWindow,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInWithMember {
    #[serde(flatten)]
    pub check_in: check_ins::Model,
    pub member: Option<CheckInMember>,
}

/* Works out whose check-in this is. Members always check themselves in;
 * staff and admins check in whoever is at the desk.
 */
fn resolve_member_id(auth_user: &AuthUser, requested: Option<i32>) -> GymlyResult<i32> {
    match auth_user.role {
        UserRole::Member => {
            let own = auth_user.require_member_id()?;
            match requested {
                Some(other) if other != own => Err(GymlyError::forbidden(
                    "Members can only check themselves in",
                )),
                _ => Ok(own),
            }
        }
        UserRole::Staff | UserRole::Admin => requested.ok_or_else(|| {
            GymlyError::bad_request("Member ID is required for staff/admin check-in")
        }),
    }
}

/* POST /checkins */
pub async fn post_check_in(
    State(state): State<AppState>,
    auth_user: AuthUser,
    body: Result<Json<CheckInRequest>, JsonRejection>,
) -> GymlyResult<Response<Body>> {
    let request = match body {
        Ok(Json(request)) => request,
        Err(JsonRejection::MissingJsonContentType(_)) => CheckInRequest::default(),
        Err(e) => return Err(e.into()),
    };

    let member_id = resolve_member_id(&auth_user, request.member_id)?;

    let member = Members::find_by_id(member_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| GymlyError::not_found(format!("Member with ID {member_id} not found")))?;

    let approved = Subscriptions::find()
        .join(JoinType::InnerJoin, subscriptions::Relation::Orders.def())
        .filter(subscriptions::Column::MemberId.eq(member_id))
        .filter(orders::Column::OrderStatus.eq(OrderStatus::Approved))
        .filter(subscriptions::Column::EndDate.is_not_null())
        .order_by_desc(subscriptions::Column::EndDate)
        .all(&state.db)
        .await?;

    let now = Utc::now();
    let active = active_subscription(now, approved);

    let (status, reason) = match active {
        Some(_) => (CheckInStatus::Allowed, None),
        None => (CheckInStatus::Denied, Some(NO_ACTIVE_SUBSCRIPTION.to_string())),
    };

    let check_in = CheckInModel {
        member_id: Set(member_id),
        status: Set(status),
        reason: Set(reason),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    info!(
        "check-in {} for member {member_id} by user {}: {:?}",
        check_in.id, auth_user.user_id, status
    );

    let Some(subscription) = active else {
        return Err(GymlyError::CheckInDenied {
            check_in_id: check_in.id,
            member_id,
        });
    };

    Ok(gymly_api_response(
        StatusCode::CREATED,
        CheckInDetail {
            check_in,
            member: member.into(),
            subscription: CheckInWindow {
                id: subscription.id,
                start_date: subscription.start_date,
                end_date: subscription.end_date,
            },
        },
    ))
}

/* GET /checkins/me */
pub async fn get_my_check_ins(
    State(state): State<AppState>,
    auth_user: AuthUser,
    query: Result<Query<CheckInsQuery>, QueryRejection>,
) -> GymlyResult<Response<Body>> {
    auth_user.require_role(&[UserRole::Member])?;
    let member_id = auth_user.require_member_id()?;
    let Query(query) = query?;
    let page = query.page_query().resolve(DEFAULT_PAGE_LIMIT)?;

    let mut select = CheckIns::find().filter(check_ins::Column::MemberId.eq(member_id));

    if let Some(status) = query.status {
        select = select.filter(check_ins::Column::Status.eq(status));
    }

    let paginator = select
        .order_by_desc(check_ins::Column::CreatedAt)
        .order_by_desc(check_ins::Column::Id)
        .paginate(&state.db, page.limit);

    let total = paginator.num_items().await?;
    let data = paginator.fetch_page(page.index()).await?;

    Ok(gymly_api_response(
        StatusCode::OK,
        Paginated::new(data, total, page),
    ))
}

/* GET /checkins */
pub async fn get_check_ins(
    State(state): State<AppState>,
    auth_user: AuthUser,
    query: Result<Query<CheckInsQuery>, QueryRejection>,
) -> GymlyResult<Response<Body>> {
    auth_user.require_role(&[UserRole::Admin, UserRole::Staff])?;
    let Query(query) = query?;
    let page = query.page_query().resolve(DEFAULT_PAGE_LIMIT)?;

    let mut select = CheckIns::find().find_also_related(Members);

    if let Some(status) = query.status {
        select = select.filter(check_ins::Column::Status.eq(status));
    }

    let paginator = select
        .order_by_desc(check_ins::Column::CreatedAt)
        .order_by_desc(check_ins::Column::Id)
        .paginate(&state.db, page.limit);

    let total = paginator.num_items().await?;
    let data = paginator
        .fetch_page(page.index())
        .await?
        .into_iter()
        .map(|(check_in, member)| CheckInWithMember {
            check_in,
            member: member.map(CheckInMember::from),
        })
        .collect();

    Ok(gymly_api_response(
        StatusCode::OK,
        Paginated::new(data, total, page),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gymly::testing::{self, TestApp, window};
    use axum::http::Method;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn sub(id: i32, span: Option<(DateTime<Utc>, DateTime<Utc>)>) -> subscriptions::Model {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        subscriptions::Model {
            id,
            member_id: 1,
            order_id: id,
            start_date: span.map(|(start, _)| start),
            end_date: span.map(|(_, end)| end),
            created_at: at,
        }
    }

    #[test]
    fn today_starts_at_utc_midnight() {
        let now = Utc.with_ymd_and_hms(2025, 11, 18, 17, 45, 3).unwrap();

        assert_eq!(
            start_of_day(now),
            Utc.with_ymd_and_hms(2025, 11, 18, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn windows_ending_earlier_today_still_count() {
        let now = Utc.with_ymd_and_hms(2025, 11, 18, 17, 0, 0).unwrap();
        let start = now - Duration::days(30);
        let ended_this_morning = Utc.with_ymd_and_hms(2025, 11, 18, 6, 0, 0).unwrap();
        let ended_yesterday = Utc.with_ymd_and_hms(2025, 11, 17, 23, 59, 59).unwrap();

        assert!(active_subscription(now, vec![sub(1, Some((start, ended_this_morning)))]).is_some());
        assert!(active_subscription(now, vec![sub(1, Some((start, ended_yesterday)))]).is_none());
    }

    #[test]
    fn future_and_empty_windows_do_not_count() {
        let now = Utc.with_ymd_and_hms(2025, 11, 18, 12, 0, 0).unwrap();
        let tomorrow = now + Duration::days(1);

        assert!(active_subscription(now, vec![sub(1, None)]).is_none());
        assert!(
            active_subscription(now, vec![sub(2, Some((tomorrow, tomorrow + Duration::days(30))))])
                .is_none()
        );
    }

    #[test]
    fn latest_end_wins() {
        let now = Utc.with_ymd_and_hms(2025, 11, 18, 12, 0, 0).unwrap();
        let start = now - Duration::days(10);
        let subs = vec![
            sub(1, Some((start, now + Duration::days(5)))),
            sub(2, Some((start, now + Duration::days(50)))),
            sub(3, Some((start, now + Duration::days(20)))),
        ];

        assert_eq!(active_subscription(now, subs).unwrap().id, 2);
    }

    struct Desk {
        app: TestApp,
        staff_token: String,
        member_token: String,
        member_id: i32,
    }

    async fn desk() -> Desk {
        let app = TestApp::new().await;
        let db = &app.state.db;
        let staff = testing::seed_user(db, "desk@gymly.com", UserRole::Staff, None).await;
        let member = testing::seed_member(db, "Jane", "0911000001").await;
        let user = testing::seed_user(db, "jane@example.com", UserRole::Member, Some(member.id)).await;

        Desk {
            staff_token: app.token_for(&staff),
            member_token: app.token_for(&user),
            member_id: member.id,
            app,
        }
    }

    #[tokio::test]
    async fn approved_members_are_let_in() {
        let d = desk().await;
        let (_, subscription) = testing::seed_subscription(
            &d.app.state.db,
            d.member_id,
            OrderStatus::Approved,
            Some(window(-3, 27)),
        )
        .await;

        let (status, body) = d
            .app
            .call(Method::POST, "/checkins", Some(&d.member_token), None)
            .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "allowed");
        assert_eq!(body["memberId"], d.member_id);
        assert_eq!(body["member"]["name"], "Jane");
        assert_eq!(body["subscription"]["id"], subscription.id);
        assert!(body.get("reason").is_none());
    }

    #[tokio::test]
    async fn denied_attempts_are_recorded() {
        let d = desk().await;
        // pending orders don't count, even with a window
        testing::seed_subscription(
            &d.app.state.db,
            d.member_id,
            OrderStatus::Pending,
            Some(window(-3, 27)),
        )
        .await;
        testing::seed_subscription(
            &d.app.state.db,
            d.member_id,
            OrderStatus::Approved,
            Some(window(-40, -10)),
        )
        .await;

        let (status, body) = d
            .app
            .call(
                Method::POST,
                "/checkins",
                Some(&d.staff_token),
                Some(json!({ "memberId": d.member_id })),
            )
            .await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["message"], NO_ACTIVE_SUBSCRIPTION);
        assert_eq!(body["checkInStatus"], "denied");
        assert_eq!(body["memberId"], d.member_id);

        let stored = CheckIns::find_by_id(body["checkInId"].as_i64().unwrap() as i32)
            .one(&d.app.state.db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, CheckInStatus::Denied);
        assert_eq!(stored.reason.as_deref(), Some(NO_ACTIVE_SUBSCRIPTION));
    }

    #[tokio::test]
    async fn who_can_check_in_whom() {
        let d = desk().await;
        let other = testing::seed_member(&d.app.state.db, "Abebe", "0911000002").await;

        let (status, body) = d
            .app
            .call(
                Method::POST,
                "/checkins",
                Some(&d.member_token),
                Some(json!({ "memberId": other.id })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["message"], "Members can only check themselves in");

        let (status, body) = d
            .app
            .call(Method::POST, "/checkins", Some(&d.staff_token), Some(json!({})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Member ID is required for staff/admin check-in");

        let (status, body) = d
            .app
            .call(
                Method::POST,
                "/checkins",
                Some(&d.staff_token),
                Some(json!({ "memberId": 9999 })),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Member with ID 9999 not found");

        assert_eq!(CheckIns::find().count(&d.app.state.db).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn history_is_filtered_and_scoped() {
        let d = desk().await;
        let db = &d.app.state.db;
        let other = testing::seed_member(db, "Abebe", "0911000002").await;
        testing::seed_check_in(db, d.member_id, CheckInStatus::Allowed).await;
        testing::seed_check_in(db, d.member_id, CheckInStatus::Denied).await;
        testing::seed_check_in(db, other.id, CheckInStatus::Denied).await;

        let (status, body) = d
            .app
            .call(Method::GET, "/checkins/me", Some(&d.member_token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);

        let (status, body) = d
            .app
            .call(
                Method::GET,
                "/checkins?status=denied",
                Some(&d.staff_token),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);
        assert_eq!(body["data"][0]["member"]["name"], "Abebe");
        assert!(body["data"][0]["member"].get("status").is_none());

        let (status, _) = d
            .app
            .call(Method::GET, "/checkins", Some(&d.member_token), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn oversized_pages_are_rejected() {
        let d = desk().await;
        testing::seed_check_in(&d.app.state.db, d.member_id, CheckInStatus::Allowed).await;

        let (status, body) = d
            .app
            .call(
                Method::GET,
                "/checkins/me?page=18446744073709551615&limit=100",
                Some(&d.member_token),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "page is out of range");

        let (status, body) = d
            .app
            .call(Method::GET, "/checkins/me?page=5", Some(&d.member_token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);
        assert_eq!(body["data"].as_array().unwrap().len(), 0);
    }
}
