//! Support answerers: keyword rules over the department table, or an HTTP forwarding endpoint.

use async_trait::async_trait;
use intake_core::{Departments, SupportDesk};
use serde::Deserialize;
use std::time::Duration;

const FORWARD_TIMEOUT: Duration = Duration::from_secs(10);

/// Deterministic keyword answers. Department hours come from the live configuration.
#[derive(Debug, Clone)]
pub struct RuleBasedSupport {
    departments: Departments,
}

impl RuleBasedSupport {
    pub fn new(departments: Departments) -> Self {
        Self { departments }
    }

    pub fn reply(&self, question: &str) -> String {
        let q = question.trim().to_lowercase();
        if q.is_empty() {
            return "Please type your question.".to_string();
        }
        if let Some(d) = self
            .departments
            .all()
            .iter()
            .find(|d| q.contains(&d.name.to_lowercase()))
        {
            return format!(
                "{} operates from {} to {} daily.",
                d.name,
                d.opens.format("%H:%M"),
                d.closes.format("%H:%M")
            );
        }
        if q.contains("appointment") || q.contains("book") {
            return "To book an appointment, send 'Hi', choose 'Book Appointment' and follow the steps."
                .to_string();
        }
        if q.contains("report") {
            return "To get your report, send 'Hi', choose 'Get Report' and send your Patient ID."
                .to_string();
        }
        if q.contains("timing") || q.contains("time") || q.contains("hours") {
            return "Timings vary by department. Please mention the department name.".to_string();
        }
        "I'm here to help! Please be more specific about your question.".to_string()
    }
}

#[async_trait]
impl SupportDesk for RuleBasedSupport {
    async fn answer(&self, question: &str) -> String {
        self.reply(question)
    }
}

#[derive(Deserialize)]
struct ForwardedAnswer {
    answer: Option<String>,
    reply: Option<String>,
}

/// Posts `{"query": ...}` to a remote answer service; reads `answer` or `reply` back.
#[derive(Clone)]
pub struct ForwardingSupport {
    client: reqwest::Client,
    url: String,
}

impl ForwardingSupport {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(FORWARD_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            url: url.into(),
        }
    }

    async fn forward(&self, question: &str) -> Result<Option<String>, reqwest::Error> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "query": question }))
            .send()
            .await?;
        if !response.status().is_success() {
            tracing::warn!(target: "intake::support", status = %response.status(), "support endpoint refused");
            return Ok(None);
        }
        let body = response.text().await?;
        Ok(Some(match serde_json::from_str::<ForwardedAnswer>(&body) {
            Ok(ForwardedAnswer { answer: Some(a), .. }) | Ok(ForwardedAnswer { reply: Some(a), .. }) => a,
            _ => body,
        }))
    }
}

#[async_trait]
impl SupportDesk for ForwardingSupport {
    async fn answer(&self, question: &str) -> String {
        match self.forward(question).await {
            Ok(Some(answer)) if !answer.trim().is_empty() => answer,
            Ok(_) => "Support is temporarily unavailable.".to_string(),
            Err(e) => {
                tracing::warn!(target: "intake::support", error = %e, "support endpoint unreachable");
                "Unable to contact support right now.".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn department_hours_come_from_configuration() {
        let desk = RuleBasedSupport::new(Departments::default());
        assert_eq!(
            desk.reply("What time does Neurology open?"),
            "Neurology operates from 14:00 to 17:00 daily."
        );
        assert!(desk.reply("how do I book an appointment").contains("Book Appointment"));
        assert!(desk.reply("my REPORT please").contains("Patient ID"));
        assert!(desk.reply("what are your timings").contains("department name"));
        assert_eq!(desk.reply("   "), "Please type your question.");
    }

    /// Local answer service on an ephemeral port; returns its base URL.
    async fn answer_service() -> String {
        use axum::http::StatusCode;
        use axum::routing::post;
        use axum::Json;

        let app = axum::Router::new()
            .route(
                "/answer",
                post(|Json(body): Json<serde_json::Value>| async move {
                    Json(serde_json::json!({ "answer": format!("echo: {}", body["query"].as_str().unwrap_or("")) }))
                }),
            )
            .route(
                "/reply",
                post(|| async { Json(serde_json::json!({ "reply": "We open at 9." })) }),
            )
            .route("/plain", post(|| async { "Plain answer" }))
            .route("/down", post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "busy") }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn forwarded_answers_are_read_from_answer_reply_or_body() {
        let base = answer_service().await;
        let desk = ForwardingSupport::new(format!("{}/answer", base));
        assert_eq!(desk.answer("opening hours?").await, "echo: opening hours?");
        let desk = ForwardingSupport::new(format!("{}/reply", base));
        assert_eq!(desk.answer("hours").await, "We open at 9.");
        let desk = ForwardingSupport::new(format!("{}/plain", base));
        assert_eq!(desk.answer("hours").await, "Plain answer");
    }

    #[tokio::test]
    async fn refused_request_reports_unavailable() {
        let base = answer_service().await;
        let desk = ForwardingSupport::new(format!("{}/down", base));
        assert_eq!(desk.answer("hours").await, "Support is temporarily unavailable.");
    }

    #[tokio::test]
    async fn unreachable_endpoint_falls_back() {
        let desk = ForwardingSupport::new("http://127.0.0.1:1/nlp_support");
        assert_eq!(desk.answer("hello?").await, "Unable to contact support right now.");
    }
}
