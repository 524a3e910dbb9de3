//! Credit balance queries and the daily credit claim.

use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::credential::Credential;
use crate::error::{JimengError, Result};
use crate::http::{ApiClient, RequestOptions};

/// Credit balance buckets as the commerce endpoint reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditInfo {
    pub gift_credit: i64,
    pub purchase_credit: i64,
    pub vip_credit: i64,
    pub total_credit: i64,
}

#[derive(Debug, Deserialize)]
struct CreditEnvelope {
    credit: CreditBuckets,
}

#[derive(Debug, Deserialize)]
struct CreditBuckets {
    gift_credit: i64,
    purchase_credit: i64,
    vip_credit: i64,
}

#[derive(Debug, Deserialize)]
struct ReceiveEnvelope {
    cur_total_credits: i64,
    receive_quota: i64,
}

/// Query the current credit balance.
pub async fn get_credit(api: &ApiClient, credential: &Credential) -> Result<CreditInfo> {
    let data = api
        .send(
            Method::POST,
            "/commerce/v1/benefits/user_credit",
            credential,
            RequestOptions::new().json(json!({})),
        )
        .await?;
    let envelope: CreditEnvelope = serde_json::from_value(data)
        .map_err(|e| JimengError::request_failed(format!("credit response: {e}")))?;
    let buckets = envelope.credit;
    let info = CreditInfo {
        gift_credit: buckets.gift_credit,
        purchase_credit: buckets.purchase_credit,
        vip_credit: buckets.vip_credit,
        total_credit: buckets.gift_credit + buckets.purchase_credit + buckets.vip_credit,
    };
    info!(
        gift = info.gift_credit,
        purchase = info.purchase_credit,
        vip = info.vip_credit,
        "credit balance"
    );
    Ok(info)
}

/// Claim today's free credits, returning the new total.
pub async fn receive_credit(api: &ApiClient, credential: &Credential) -> Result<i64> {
    let data = api
        .send(
            Method::POST,
            "/commerce/v1/benefits/credit_receive",
            credential,
            RequestOptions::new().json(json!({ "time_zone": "Asia/Shanghai" })),
        )
        .await?;
    let envelope: ReceiveEnvelope = serde_json::from_value(data)
        .map_err(|e| JimengError::request_failed(format!("credit receive response: {e}")))?;
    info!(
        received = envelope.receive_quota,
        total = envelope.cur_total_credits,
        "claimed daily credits"
    );
    Ok(envelope.cur_total_credits)
}

/// Check whether a credential still maps to a live session.
///
/// Errors are folded into `false`: a dead token and an unreachable
/// account endpoint look the same to callers probing liveness.
pub async fn check_token(api: &ApiClient, credential: &Credential) -> bool {
    let result = api
        .send(
            Method::POST,
            "/passport/account/info/v2",
            credential,
            RequestOptions::new().param("account_sdk_source", "web"),
        )
        .await;
    match result {
        Ok(data) => data.get("user_id").is_some_and(|v| !v.is_null()),
        Err(_) => false,
    }
}
