//! Checkout sessions with the payment processor (Stripe).
//!
//! The booking handler only needs one call: create a hosted checkout session
//! for a single line item and get back its id and redirect URL.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::PaymentsConfig;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payments are not configured")]
    NotConfigured,
    #[error("payment request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("payment processor returned {status}: {body}")]
    Api { status: u16, body: String },
}

/// One product in a checkout session.
#[derive(Debug, Clone, PartialEq)]
pub struct LineItem {
    pub name: String,
    pub description: String,
    pub images: Vec<String>,
    /// Amount in the currency's major unit (dollars)
    pub amount: f64,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutRequest {
    pub success_url: String,
    pub cancel_url: String,
    pub customer_email: String,
    pub client_reference_id: String,
    pub line_item: LineItem,
}

/// The parts of a created session the client needs to redirect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession, PaymentError>;
}

/// Stripe Checkout over the REST API
pub struct StripeGateway {
    secret_key: String,
    api_base: String,
    currency: String,
    client: reqwest::Client,
}

impl StripeGateway {
    pub fn new(config: &PaymentsConfig, secret_key: String) -> Result<Self, PaymentError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            secret_key,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            currency: config.currency.clone(),
            client,
        })
    }
}

/// Form fields for `POST /v1/checkout/sessions`. Amounts are sent in cents.
fn session_form(request: &CheckoutRequest, currency: &str) -> Vec<(String, String)> {
    let item = &request.line_item;
    let mut form = vec![
        ("mode".to_string(), "payment".to_string()),
        ("payment_method_types[0]".to_string(), "card".to_string()),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
        ("customer_email".to_string(), request.customer_email.clone()),
        ("client_reference_id".to_string(), request.client_reference_id.clone()),
        ("line_items[0][quantity]".to_string(), item.quantity.to_string()),
        ("line_items[0][price_data][currency]".to_string(), currency.to_string()),
        (
            "line_items[0][price_data][unit_amount]".to_string(),
            ((item.amount * 100.0).round() as i64).to_string(),
        ),
        ("line_items[0][price_data][product_data][name]".to_string(), item.name.clone()),
        (
            "line_items[0][price_data][product_data][description]".to_string(),
            item.description.clone(),
        ),
    ];
    for (i, image) in item.images.iter().enumerate() {
        form.push((
            format!("line_items[0][price_data][product_data][images][{}]", i),
            image.clone(),
        ));
    }
    form
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession, PaymentError> {
        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&session_form(request, &self.currency))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentError::Api { status, body });
        }

        let session: CheckoutSession = response.json().await?;
        tracing::info!(session = %session.id, reference = %request.client_reference_id, "Checkout session created");
        Ok(session)
    }
}

/// Used when no secret key is configured; every call fails.
#[derive(Debug, Default)]
pub struct DisabledGateway;

#[async_trait]
impl PaymentGateway for DisabledGateway {
    async fn create_checkout_session(&self, _request: &CheckoutRequest) -> Result<CheckoutSession, PaymentError> {
        Err(PaymentError::NotConfigured)
    }
}

pub fn gateway_from_config(config: &PaymentsConfig) -> Result<Arc<dyn PaymentGateway>, PaymentError> {
    match &config.stripe_secret_key {
        Some(key) if !key.is_empty() => Ok(Arc::new(StripeGateway::new(config, key.clone())?)),
        _ => {
            tracing::warn!("Stripe secret key not set, checkout is disabled");
            Ok(Arc::new(DisabledGateway))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Form, Json, Router};
    use std::collections::HashMap;

    fn request() -> CheckoutRequest {
        CheckoutRequest {
            success_url: "http://localhost:3000/?tour=t1&user=u1&price=497".to_string(),
            cancel_url: "http://localhost:3000/tour/the-sea-explorer".to_string(),
            customer_email: "laura@example.com".to_string(),
            client_reference_id: "t1".to_string(),
            line_item: LineItem {
                name: "The Sea Explorer Tour".to_string(),
                description: "Exploring the jaw-dropping US east coast".to_string(),
                images: vec!["http://localhost:3000/img/tours/tour-2-cover.jpg".to_string()],
                amount: 497.0,
                quantity: 1,
            },
        }
    }

    #[test]
    fn test_form_amount_in_cents() {
        let form: HashMap<String, String> = session_form(&request(), "usd").into_iter().collect();
        assert_eq!(form["line_items[0][price_data][unit_amount]"], "49700");
        assert_eq!(form["line_items[0][price_data][currency]"], "usd");
        assert_eq!(form["customer_email"], "laura@example.com");
        assert_eq!(
            form["line_items[0][price_data][product_data][images][0]"],
            "http://localhost:3000/img/tours/tour-2-cover.jpg"
        );
    }

    #[tokio::test]
    async fn test_disabled_gateway_fails() {
        let err = DisabledGateway.create_checkout_session(&request()).await.unwrap_err();
        assert!(matches!(err, PaymentError::NotConfigured));
    }

    #[tokio::test]
    async fn test_stripe_gateway_against_local_server() {
        let app = Router::new().route(
            "/v1/checkout/sessions",
            post(|Form(form): Form<HashMap<String, String>>| async move {
                Json(serde_json::json!({
                    "id": format!("cs_{}", form["client_reference_id"]),
                    "url": "https://checkout.example/session",
                    "object": "checkout.session"
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = PaymentsConfig {
            api_base: format!("http://{}/", addr),
            ..Default::default()
        };
        let gateway = StripeGateway::new(&config, "sk_test".to_string()).unwrap();
        let session = gateway.create_checkout_session(&request()).await.unwrap();
        assert_eq!(session.id, "cs_t1");
        assert_eq!(session.url.as_deref(), Some("https://checkout.example/session"));
    }
}
