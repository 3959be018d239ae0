use super::{
    AuthUser, DEFAULT_PAGE_LIMIT, PageQuery, Paginated, database,
    error::{GymlyError, GymlyResult},
    gymly_api_response,
    notify::{self, Notice},
    state::AppState,
    storage::{RECEIPT_FOLDER, ReceiptUpload},
};
use database::{
    MemberStatus, NotificationType, OrderStatus, UserRole,
    entities::{Members, OrderModel, Orders, Packages, SubscriptionModel, Subscriptions},
    members, orders, packages, subscriptions,
};

use axum::{
    Json,
    body::Body,
    extract::{
        FromRequest, Multipart, Path, Query, Request, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{Response, StatusCode, header::CONTENT_TYPE},
};
use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait, prelude::Expr,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

const MAX_REASON_CHARS: usize = 500;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeJson {
    package_id: i32,
    paid_amount: i32,
    receipt_url: Option<String>,
}

/// Subscribe body, sent either as JSON or as a multipart form carrying the
/// receipt image.
#[derive(Debug)]
pub struct SubscribeRequest {
    pub package_id: i32,
    pub paid_amount: i32,
    pub receipt_url: Option<String>,
    pub receipt: Option<ReceiptUpload>,
}

impl SubscribeRequest {
    async fn from_multipart(mut multipart: Multipart) -> GymlyResult<Self> {
        let mut package_id = None;
        let mut paid_amount = None;
        let mut receipt_url = None;
        let mut receipt = None;

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();

            match name.as_str() {
                "packageId" => package_id = Some(parse_form_int(&name, &field.text().await?)?),
                "paidAmount" => paid_amount = Some(parse_form_int(&name, &field.text().await?)?),
                "receiptUrl" => {
                    receipt_url = Some(field.text().await?).filter(|url| !url.trim().is_empty())
                }
                "receipt" => {
                    let file_name = field.file_name().map(str::to_string);
                    let content_type = field
                        .content_type()
                        .unwrap_or("application/octet-stream")
                        .to_string();
                    let bytes = field.bytes().await?.to_vec();

                    receipt = Some(ReceiptUpload {
                        file_name,
                        content_type,
                        bytes,
                    });
                }
                _ => debug!("ignoring form field {name:?}"),
            }
        }

        Ok(Self {
            package_id: package_id
                .ok_or_else(|| GymlyError::bad_request("packageId is required"))?,
            paid_amount: paid_amount
                .ok_or_else(|| GymlyError::bad_request("paidAmount is required"))?,
            receipt_url,
            receipt,
        })
    }

    fn validate(&self) -> GymlyResult<()> {
        if self.package_id < 1 {
            return Err(GymlyError::bad_request("packageId must be a positive integer"));
        }

        if self.paid_amount < 1 {
            return Err(GymlyError::bad_request("paidAmount must be a positive integer"));
        }

        if let Some(url) = &self.receipt_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(GymlyError::bad_request("receiptUrl must be an http(s) URL"));
            }
        }

        if let Some(receipt) = &self.receipt {
            receipt.validate()?;
        }

        Ok(())
    }
}

fn parse_form_int(name: &str, value: &str) -> GymlyResult<i32> {
    value
        .trim()
        .parse()
        .map_err(|_| GymlyError::bad_request(format!("{name} must be an integer")))
}

impl<S: Send + Sync> FromRequest<S> for SubscribeRequest {
    type Rejection = GymlyError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("multipart/form-data"));

        if is_multipart {
            let multipart = Multipart::from_request(request, state).await?;
            return Self::from_multipart(multipart).await;
        }

        let Json(body) = Json::<SubscribeJson>::from_request(request, state).await?;

        Ok(Self {
            package_id: body.package_id,
            paid_amount: body.paid_amount,
            receipt_url: body.receipt_url.filter(|url| !url.trim().is_empty()),
            receipt: None,
        })
    }
}

#[derive(Serialize)]
pub struct SubscribeResponse {
    pub order: orders::Model,
    pub subscription: subscriptions::Model,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionsQuery {
    pub order_status: Option<OrderStatus>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

impl SubscriptionsQuery {
    fn page_query(&self) -> PageQuery {
        PageQuery {
            page: self.page,
            limit: self.limit,
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct MemberSummary {
    pub id: i32,
    pub name: String,
    pub phone_number: String,
    pub status: MemberStatus,
}

impl From<members::Model> for MemberSummary {
    fn from(member: members::Model) -> Self {
        Self {
            id: member.id,
            name: member.name,
            phone_number: member.phone_number,
            status: member.status,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionWithMember {
    #[serde(flatten)]
    pub subscription: subscriptions::Model,
    pub member: Option<MemberSummary>,
    pub order: Option<orders::Model>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MySubscription {
    #[serde(flatten)]
    pub subscription: subscriptions::Model,
    pub order: Option<orders::Model>,
}

#[derive(Deserialize, Default)]
pub struct DenyRequest {
    pub reason: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveResponse {
    pub subscription_id: i32,
    pub order_id: i32,
    pub order_status: OrderStatus,
    pub start_date: Option<chrono::DateTime<Utc>>,
    pub end_date: Option<chrono::DateTime<Utc>>,
    pub message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DenyResponse {
    pub subscription_id: i32,
    pub order_id: i32,
    pub order_status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub message: String,
}

/* Writes the pending order and its window-less subscription together. */
async fn create_request(
    db: &DatabaseConnection,
    member_id: i32,
    package: &packages::Model,
    paid_amount: i32,
    receipt_url: Option<String>,
) -> GymlyResult<(orders::Model, subscriptions::Model)> {
    let now = Utc::now();
    let txn = db.begin().await?;

    let order = OrderModel {
        member_id: Set(member_id),
        package_name: Set(package.name.clone()),
        package_price: Set(package.price),
        package_duration_days: Set(package.duration_days),
        paid_amount: Set(paid_amount),
        receipt_url: Set(receipt_url),
        order_status: Set(OrderStatus::Pending),
        rejection_reason: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    let subscription = SubscriptionModel {
        member_id: Set(member_id),
        order_id: Set(order.id),
        start_date: Set(None),
        end_date: Set(None),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;

    Ok((order, subscription))
}

/* POST /subscriptions/subscribe */
pub async fn post_subscribe(
    State(state): State<AppState>,
    auth_user: AuthUser,
    request: SubscribeRequest,
) -> GymlyResult<Response<Body>> {
    auth_user.require_role(&[UserRole::Member])?;
    let member_id = auth_user.require_member_id()?;
    request.validate()?;

    let package = Packages::find_by_id(request.package_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| GymlyError::not_found("Package not found"))?;

    if !package.is_active {
        return Err(GymlyError::forbidden("Package is not active"));
    }

    let member = Members::find_by_id(member_id)
        .one(&state.db)
        .await?
        .ok_or_else(|| GymlyError::not_found("Member not found"))?;

    let (receipt_key, receipt_url) = match request.receipt {
        Some(receipt) => {
            let key = receipt.object_key(RECEIPT_FOLDER);
            let url = state
                .receipts
                .put(&key, &receipt.content_type, receipt.bytes)
                .await?;
            (Some(key), Some(url))
        }
        None => (None, request.receipt_url),
    };

    let (order, subscription) =
        match create_request(&state.db, member_id, &package, request.paid_amount, receipt_url)
            .await
        {
            Ok(created) => created,
            Err(e) => {
                if let Some(key) = receipt_key {
                    warn!("receipt {key} is orphaned, member {member_id}'s request was not stored");
                }
                return Err(e);
            }
        };

    info!(
        "member {member_id} requested package {} (subscription {}, order {})",
        package.id, subscription.id, order.id
    );

    let notice = Notice::new(
        NotificationType::SubscriptionRequest,
        "New subscription request",
        format!("{} requested the {} package", member.name, package.name),
    )
    .with_data(json!({
        "subscriptionId": subscription.id,
        "orderId": order.id,
        "memberId": member_id,
        "memberName": member.name,
        "packageName": package.name,
    }));

    if let Err(e) = notify::send_to_admins(&state.db, state.push.as_ref(), &notice).await {
        error!("Failed to notify admins about subscription {}: {e}", subscription.id);
    }

    Ok(gymly_api_response(
        StatusCode::CREATED,
        SubscribeResponse {
            order,
            subscription,
        },
    ))
}

/* GET /subscriptions */
pub async fn get_subscriptions(
    State(state): State<AppState>,
    auth_user: AuthUser,
    query: Result<Query<SubscriptionsQuery>, QueryRejection>,
) -> GymlyResult<Response<Body>> {
    auth_user.require_role(&[UserRole::Admin])?;
    let Query(query) = query?;
    let page = query.page_query().resolve(DEFAULT_PAGE_LIMIT)?;

    let mut select = Subscriptions::find().find_also_related(Orders);

    if let Some(order_status) = query.order_status {
        select = select.filter(orders::Column::OrderStatus.eq(order_status));
    }

    let paginator = select
        .order_by_desc(subscriptions::Column::CreatedAt)
        .order_by_desc(subscriptions::Column::Id)
        .paginate(&state.db, page.limit);

    let total = paginator.num_items().await?;
    let rows = paginator.fetch_page(page.index()).await?;

    let member_ids: Vec<i32> = rows.iter().map(|(sub, _)| sub.member_id).collect();
    let members: HashMap<i32, members::Model> = Members::find()
        .filter(members::Column::Id.is_in(member_ids))
        .all(&state.db)
        .await?
        .into_iter()
        .map(|member| (member.id, member))
        .collect();

    let data = rows
        .into_iter()
        .map(|(subscription, order)| SubscriptionWithMember {
            member: members
                .get(&subscription.member_id)
                .cloned()
                .map(MemberSummary::from),
            subscription,
            order,
        })
        .collect();

    Ok(gymly_api_response(
        StatusCode::OK,
        Paginated::new(data, total, page),
    ))
}

/* GET /subscriptions/me */
pub async fn get_my_subscriptions(
    State(state): State<AppState>,
    auth_user: AuthUser,
    query: Result<Query<SubscriptionsQuery>, QueryRejection>,
) -> GymlyResult<Response<Body>> {
    auth_user.require_role(&[UserRole::Member])?;
    let member_id = auth_user.require_member_id()?;
    let Query(query) = query?;
    let page = query.page_query().resolve(DEFAULT_PAGE_LIMIT)?;

    let mut select = Subscriptions::find()
        .find_also_related(Orders)
        .filter(subscriptions::Column::MemberId.eq(member_id));

    if let Some(order_status) = query.order_status {
        select = select.filter(orders::Column::OrderStatus.eq(order_status));
    }

    let paginator = select
        .order_by_desc(subscriptions::Column::CreatedAt)
        .order_by_desc(subscriptions::Column::Id)
        .paginate(&state.db, page.limit);

    let total = paginator.num_items().await?;
    let data = paginator
        .fetch_page(page.index())
        .await?
        .into_iter()
        .map(|(subscription, order)| MySubscription {
            subscription,
            order,
        })
        .collect();

    Ok(gymly_api_response(
        StatusCode::OK,
        Paginated::new(data, total, page),
    ))
}

/* Loads a subscription and its order and makes sure the order can still be
 * decided. Runs inside the caller's transaction.
 */
async fn pending_subscription<C: sea_orm::ConnectionTrait>(
    db: &C,
    subscription_id: i32,
    next: OrderStatus,
) -> GymlyResult<(subscriptions::Model, orders::Model)> {
    let (subscription, order) = Subscriptions::find_by_id(subscription_id)
        .find_also_related(Orders)
        .one(db)
        .await?
        .ok_or_else(|| GymlyError::not_found("Subscription not found"))?;

    let order = order.ok_or_else(|| {
        GymlyError::internal(format!("subscription {subscription_id} has no order"))
    })?;

    if !order.order_status.can_transition_to(next) {
        return Err(GymlyError::bad_request("Subscription is not pending"));
    }

    Ok((subscription, order))
}

/* Moves the order out of pending. The status guard in the WHERE clause makes
 * a concurrent decision on the same order lose cleanly.
 */
async fn decide_order<C: sea_orm::ConnectionTrait>(
    db: &C,
    order_id: i32,
    next: OrderStatus,
    reason: Option<String>,
) -> GymlyResult<orders::Model> {
    let result = Orders::update_many()
        .col_expr(orders::Column::OrderStatus, Expr::value(next))
        .col_expr(orders::Column::RejectionReason, Expr::value(reason))
        .col_expr(orders::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(orders::Column::Id.eq(order_id))
        .filter(orders::Column::OrderStatus.eq(OrderStatus::Pending))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        return Err(GymlyError::bad_request("Subscription is not pending"));
    }

    Orders::find_by_id(order_id)
        .one(db)
        .await?
        .ok_or_else(|| GymlyError::not_found("Order not found"))
}

fn parse_id(path: Result<Path<i32>, PathRejection>) -> GymlyResult<i32> {
    let Path(id) = path?;

    if id < 1 {
        return Err(GymlyError::bad_request("id must be a positive integer"));
    }

    Ok(id)
}

/* POST /subscriptions/{id}/approve */
pub async fn post_approve(
    State(state): State<AppState>,
    auth_user: AuthUser,
    path: Result<Path<i32>, PathRejection>,
) -> GymlyResult<Response<Body>> {
    auth_user.require_role(&[UserRole::Admin])?;
    let subscription_id = parse_id(path)?;

    let txn = state.db.begin().await?;
    let (subscription, order) =
        pending_subscription(&txn, subscription_id, OrderStatus::Approved).await?;

    let order = decide_order(&txn, order.id, OrderStatus::Approved, None).await?;

    let start_date = Utc::now();
    let end_date = start_date + Duration::days(i64::from(order.package_duration_days));

    let mut window = subscription.into_active_model();
    window.start_date = Set(Some(start_date));
    window.end_date = Set(Some(end_date));
    let subscription = window.update(&txn).await?;

    txn.commit().await?;

    info!(
        "subscription {} approved by user {} until {end_date}",
        subscription.id, auth_user.user_id
    );

    let notice = Notice::new(
        NotificationType::SubscriptionApproved,
        "Subscription approved",
        format!(
            "Your {} subscription is active until {}",
            order.package_name,
            end_date.format("%Y-%m-%d")
        ),
    )
    .with_data(json!({
        "subscriptionId": subscription.id,
        "orderId": order.id,
        "startDate": start_date.to_rfc3339(),
        "endDate": end_date.to_rfc3339(),
    }));

    if let Err(e) =
        notify::send_to_member(&state.db, state.push.as_ref(), subscription.member_id, &notice).await
    {
        error!("Failed to notify member {}: {e}", subscription.member_id);
    }

    Ok(gymly_api_response(
        StatusCode::OK,
        ApproveResponse {
            subscription_id: subscription.id,
            order_id: order.id,
            order_status: order.order_status,
            start_date: subscription.start_date,
            end_date: subscription.end_date,
            message: "Subscription approved successfully".to_string(),
        },
    ))
}

/* POST /subscriptions/{id}/deny
 *
 * The body is optional; a bare POST denies without a reason.
 */
pub async fn post_deny(
    State(state): State<AppState>,
    auth_user: AuthUser,
    path: Result<Path<i32>, PathRejection>,
    body: Result<Json<DenyRequest>, JsonRejection>,
) -> GymlyResult<Response<Body>> {
    auth_user.require_role(&[UserRole::Admin])?;
    let subscription_id = parse_id(path)?;

    let request = match body {
        Ok(Json(request)) => request,
        Err(JsonRejection::MissingJsonContentType(_)) => DenyRequest::default(),
        Err(e) => return Err(e.into()),
    };

    let reason = request
        .reason
        .map(|reason| reason.trim().to_string())
        .filter(|reason| !reason.is_empty());

    if reason
        .as_ref()
        .is_some_and(|reason| reason.chars().count() > MAX_REASON_CHARS)
    {
        return Err(GymlyError::bad_request(format!(
            "reason must be at most {MAX_REASON_CHARS} characters"
        )));
    }

    let txn = state.db.begin().await?;
    let (subscription, order) =
        pending_subscription(&txn, subscription_id, OrderStatus::Rejected).await?;
    let order = decide_order(&txn, order.id, OrderStatus::Rejected, reason.clone()).await?;
    txn.commit().await?;

    info!(
        "subscription {} denied by user {}",
        subscription.id, auth_user.user_id
    );

    let body = match &reason {
        Some(reason) => format!(
            "Your {} subscription request was denied: {reason}",
            order.package_name
        ),
        None => format!(
            "Your {} subscription request was denied",
            order.package_name
        ),
    };

    let notice = Notice::new(
        NotificationType::SubscriptionRejected,
        "Subscription denied",
        body,
    )
    .with_data(json!({
        "subscriptionId": subscription.id,
        "orderId": order.id,
        "reason": reason,
    }));

    if let Err(e) =
        notify::send_to_member(&state.db, state.push.as_ref(), subscription.member_id, &notice).await
    {
        error!("Failed to notify member {}: {e}", subscription.member_id);
    }

    Ok(gymly_api_response(
        StatusCode::OK,
        DenyResponse {
            subscription_id: subscription.id,
            order_id: order.id,
            order_status: order.order_status,
            reason,
            message: "Subscription denied".to_string(),
        },
    ))
}
