//! Conversation state: the current step and the fields collected so far.

use crate::ledger::{Gender, ReservationRequest};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Position in the dialogue graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Uninitialized,
    Menu,
    FirstName,
    LastName,
    Gender,
    Address,
    Email,
    Phone,
    Department,
    Date,
    TimeSelection,
    ReportLookup,
    Support,
}

impl Step {
    pub fn all() -> [Self; 13] {
        [
            Self::Uninitialized,
            Self::Menu,
            Self::FirstName,
            Self::LastName,
            Self::Gender,
            Self::Address,
            Self::Email,
            Self::Phone,
            Self::Department,
            Self::Date,
            Self::TimeSelection,
            Self::ReportLookup,
            Self::Support,
        ]
    }
}

/// Partially collected booking data, filled in step order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// `Some("")` records an explicit skip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<NaiveTime>,
    /// Times offered by the last time prompt, in display order. Never persisted to a booking.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<NaiveTime>,
}

impl IntakeFields {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Complete request, or `None` while any required field is missing.
    pub fn to_request(&self) -> Option<ReservationRequest> {
        Some(ReservationRequest {
            first_name: self.first_name.clone()?,
            last_name: self.last_name.clone()?,
            gender: self.gender?,
            address: self.address.clone()?,
            email: self.email.clone().unwrap_or_default(),
            phone: self.phone.clone()?,
            department: self.department.clone()?,
            date: self.date?,
            time: self.time?,
        })
    }
}

/// Durable per-conversation dialogue state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    pub conversation_id: String,
    pub step: Step,
    #[serde(default)]
    pub fields: IntakeFields,
    pub last_activity: DateTime<Utc>,
}

impl ConversationState {
    /// A fresh state with no collected fields.
    pub fn new(conversation_id: impl Into<String>, step: Step, now: DateTime<Utc>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            step,
            fields: IntakeFields::default(),
            last_activity: now,
        }
    }

    pub fn uninitialized(conversation_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::new(conversation_id, Step::Uninitialized, now)
    }

    /// Moves to `step`, keeping fields and stamping activity.
    pub fn advance(mut self, step: Step, now: DateTime<Utc>) -> Self {
        self.step = step;
        self.last_activity = now;
        self
    }

    /// Holds an uninitialized step to its empty-fields invariant.
    pub fn is_consistent(&self) -> bool {
        self.step != Step::Uninitialized || self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_requires_every_field() {
        let mut fields = IntakeFields {
            first_name: Some("Asha".into()),
            last_name: Some("Rao".into()),
            gender: Some(Gender::Female),
            address: Some("12 MG Road".into()),
            email: None,
            phone: Some("+919876543210".into()),
            department: Some("Cardiology".into()),
            date: NaiveDate::from_ymd_opt(2026, 10, 19),
            time: None,
            candidates: Vec::new(),
        };
        assert!(fields.to_request().is_none());
        fields.time = NaiveTime::from_hms_opt(9, 0, 0);
        let req = fields.to_request().unwrap();
        assert_eq!(req.email, "");
        assert_eq!(req.department, "Cardiology");
    }

    #[test]
    fn uninitialized_state_must_be_empty() {
        let now = Utc::now();
        let mut state = ConversationState::uninitialized("1", now);
        assert!(state.is_consistent());
        state.fields.first_name = Some("Asha".into());
        assert!(!state.is_consistent());
        assert!(state.advance(Step::LastName, now).is_consistent());
    }

    #[test]
    fn serde_round_trip_keeps_step_tag() {
        let now = Utc::now();
        let state = ConversationState::new("919876543210", Step::TimeSelection, now);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["step"], "time_selection");
        let back: ConversationState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
