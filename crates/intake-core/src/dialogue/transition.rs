//! Pure per-step transitions. I/O is requested as an [`Effect`] and finished by an `after_*` function.

use super::collaborators::Outbound;
use super::prompts;
use super::state::{ConversationState, Step};
use crate::error::{ReservationError, StoreError};
use crate::ledger::{BookingRecord, Gender, ReservationRequest, SlotKey, SlotLedger};
use crate::normalize::{self, NormalizedInput, PhoneRules};
use crate::shared::{Department, Departments};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

/// Words that end a support conversation.
pub const EXIT_WORDS: [&str; 4] = ["exit", "quit", "bye", "close"];

/// Words that return from the time list to the date prompt, fields kept.
pub const CHANGE_DATE_WORDS: [&str; 3] = ["back", "change date", "another date"];

const MAX_NAME_LEN: usize = 50;
const MAX_ADDRESS_LEN: usize = 200;

/// Read-only inputs every transition may consult.
pub struct StepContext<'a> {
    pub app_name: &'a str,
    pub departments: &'a Departments,
    /// Used only for the advisory full-slot filter on the date step.
    pub ledger: &'a dyn SlotLedger,
    pub phone_rules: &'a PhoneRules,
    pub record_prefix: &'a str,
    pub now: DateTime<Utc>,
    pub today: NaiveDate,
}

/// Next state and replies. `next == None` clears the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: Option<ConversationState>,
    pub replies: Vec<Outbound>,
}

impl Transition {
    fn stay(state: ConversationState, replies: Vec<Outbound>) -> Self {
        Self {
            next: Some(state),
            replies,
        }
    }

    fn clear(replies: Vec<Outbound>) -> Self {
        Self { next: None, replies }
    }
}

/// Work the engine must perform before the transition can finish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Book the slot; finish with [`after_reservation`].
    Reserve {
        request: ReservationRequest,
        pending: ConversationState,
    },
    /// Fetch a booking by its normalized id; finish with [`after_lookup`].
    LookupRecord { id: String },
    /// Ask the support desk; finish with [`after_support`].
    AskSupport {
        question: String,
        pending: ConversationState,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done(Transition),
    Effect(Effect),
}

impl From<Transition> for Outcome {
    fn from(t: Transition) -> Self {
        Outcome::Done(t)
    }
}

/// Greeting or reset keyword from any step: fresh menu, fields discarded.
pub fn reset(conversation_id: &str, ctx: &StepContext<'_>) -> Transition {
    Transition::stay(
        ConversationState::new(conversation_id, Step::Menu, ctx.now),
        vec![prompts::menu(ctx.app_name)],
    )
}

/// Prompt that asks for the input `state.step` expects.
pub fn prompt_for(state: &ConversationState, ctx: &StepContext<'_>) -> Outbound {
    match state.step {
        Step::Uninitialized => prompts::start_hint(),
        Step::Menu => prompts::menu(ctx.app_name),
        Step::FirstName => prompts::ask_first_name(),
        Step::LastName => prompts::ask_last_name(),
        Step::Gender => prompts::ask_gender(),
        Step::Address => prompts::ask_address(),
        Step::Email => prompts::ask_email(),
        Step::Phone => prompts::ask_phone(ctx.phone_rules),
        Step::Department => prompts::ask_department(ctx.departments),
        Step::Date => match chosen_department(state, ctx) {
            Some(d) => prompts::ask_date(d),
            None => prompts::ask_department(ctx.departments),
        },
        Step::TimeSelection => match (&state.fields.department, state.fields.date) {
            (Some(dept), Some(date)) => prompts::ask_time(dept, date, &state.fields.candidates),
            _ => prompts::ask_department(ctx.departments),
        },
        Step::ReportLookup => prompts::ask_report_id(),
        Step::Support => prompts::support_intro(),
    }
}

fn chosen_department<'a>(state: &ConversationState, ctx: &StepContext<'a>) -> Option<&'a Department> {
    state
        .fields
        .department
        .as_deref()
        .and_then(|name| ctx.departments.get(name))
}

/// Validation failed: hint, then the unchanged prompt; step and fields untouched.
fn reprompt(state: ConversationState, hint: &str, ctx: &StepContext<'_>) -> Outcome {
    let prompt = prompt_for(&state, ctx);
    let mut state = state;
    state.last_activity = ctx.now;
    Transition::stay(state, vec![prompts::invalid(hint), prompt]).into()
}

/// Stores the parsed value (already merged into `state`), moves on, and asks for the next field.
fn advance(state: ConversationState, next: Step, ctx: &StepContext<'_>) -> Outcome {
    let state = state.advance(next, ctx.now);
    let prompt = prompt_for(&state, ctx);
    Transition::stay(state, vec![prompt]).into()
}

/// One non-reset input against the current state.
pub fn step(state: ConversationState, input: &NormalizedInput, ctx: &StepContext<'_>) -> Outcome {
    match state.step {
        Step::Uninitialized => Transition::clear(vec![prompts::start_hint()]).into(),
        Step::Menu => on_menu(state, input, ctx),
        Step::FirstName => match parse_name(&input.text) {
            Some(name) => {
                let mut state = state;
                state.fields.first_name = Some(name);
                advance(state, Step::LastName, ctx)
            }
            None => reprompt(state, "Please enter a valid first name (letters only).", ctx),
        },
        Step::LastName => match parse_name(&input.text) {
            Some(name) => {
                let mut state = state;
                state.fields.last_name = Some(name);
                advance(state, Step::Gender, ctx)
            }
            None => reprompt(state, "Please enter a valid last name (letters only).", ctx),
        },
        Step::Gender => {
            let raw = input.selection_id.as_deref().unwrap_or(input.text.as_str());
            match Gender::parse(raw).or_else(|| Gender::parse(&input.text)) {
                Some(gender) => {
                    let mut state = state;
                    state.fields.gender = Some(gender);
                    advance(state, Step::Address, ctx)
                }
                None => reprompt(state, "Please choose one of the gender options.", ctx),
            }
        }
        Step::Address => {
            let address = input.text.trim();
            if address.is_empty() || address.chars().count() > MAX_ADDRESS_LEN {
                return reprompt(state, "Please enter your address.", ctx);
            }
            let mut state = state;
            state.fields.address = Some(address.to_string());
            advance(state, Step::Email, ctx)
        }
        Step::Email => {
            let email = if input.keyword() == "skip" {
                String::new()
            } else if normalize::is_email(&input.text) {
                input.text.trim().to_lowercase()
            } else {
                return reprompt(state, "That doesn't look like an email address.", ctx);
            };
            let mut state = state;
            state.fields.email = Some(email);
            advance(state, Step::Phone, ctx)
        }
        Step::Phone => match ctx.phone_rules.normalize_phone(&input.text) {
            Some(phone) => {
                let mut state = state;
                state.fields.phone = Some(phone);
                advance(state, Step::Department, ctx)
            }
            None => reprompt(state, "Please enter a valid mobile number.", ctx),
        },
        Step::Department => match resolve_department(input, ctx.departments) {
            Some(dept) => {
                let mut state = state;
                state.fields.department = Some(dept.name.clone());
                advance(state, Step::Date, ctx)
            }
            None => reprompt(state, "Please pick a department from the list.", ctx),
        },
        Step::Date => on_date(state, input, ctx),
        Step::TimeSelection => on_time(state, input, ctx),
        Step::ReportLookup => {
            if input.text.is_empty() {
                return reprompt(state, "Please enter your Patient ID.", ctx);
            }
            Outcome::Effect(Effect::LookupRecord {
                id: normalize::normalize_record_id(&input.text, ctx.record_prefix),
            })
        }
        Step::Support => {
            if EXIT_WORDS.contains(&input.keyword().as_str()) {
                return Transition::clear(vec![prompts::support_goodbye()]).into();
            }
            if input.text.is_empty() {
                return reprompt(state, "Please type your question.", ctx);
            }
            Outcome::Effect(Effect::AskSupport {
                question: input.text.clone(),
                pending: state.advance(Step::Support, ctx.now),
            })
        }
    }
}

fn on_menu(state: ConversationState, input: &NormalizedInput, ctx: &StepContext<'_>) -> Outcome {
    let choice = input
        .selection_id
        .clone()
        .unwrap_or_else(|| input.keyword());
    let next = match choice.as_str() {
        prompts::BOOK_ID | "1" | "book" | "book appointment" | "appointment" => Step::FirstName,
        prompts::REPORT_ID | "2" | "report" | "get report" => Step::ReportLookup,
        prompts::SUPPORT_ID | "3" | "support" | "help" => Step::Support,
        _ => return reprompt(state, "Please choose one of the options below.", ctx),
    };
    advance(state, next, ctx)
}

fn on_date(state: ConversationState, input: &NormalizedInput, ctx: &StepContext<'_>) -> Outcome {
    let Some(department) = chosen_department(&state, ctx) else {
        // Department vanished from configuration mid-dialogue.
        let mut state = state;
        state.fields.department = None;
        return advance(state, Step::Department, ctx);
    };
    let Some(date) = normalize::parse_date(&input.text, ctx.today) else {
        return reprompt(state, "Sorry, I couldn't read that date.", ctx);
    };
    if date < ctx.today {
        let prompt = prompt_for(&state, ctx);
        let mut state = state;
        state.last_activity = ctx.now;
        return Transition::stay(state, vec![prompts::date_in_past(), prompt]).into();
    }
    let candidates = open_times(department, date, ctx.ledger);
    if candidates.is_empty() {
        let prompt = prompt_for(&state, ctx);
        let mut state = state;
        state.last_activity = ctx.now;
        return Transition::stay(state, vec![prompts::no_times(date), prompt]).into();
    }
    let mut state = state;
    state.fields.date = Some(date);
    state.fields.time = None;
    state.fields.candidates = candidates;
    advance(state, Step::TimeSelection, ctx)
}

/// Time points not yet at capacity. Advisory only: read errors keep the time listed.
fn open_times(department: &Department, date: NaiveDate, ledger: &dyn SlotLedger) -> Vec<NaiveTime> {
    department
        .time_points()
        .into_iter()
        .filter(|time| {
            let key = SlotKey::new(department.name.clone(), date, *time);
            match ledger.reserved_count(&key) {
                Ok(count) => count < department.capacity,
                Err(e) => {
                    tracing::warn!(target: "intake::dialogue", slot = %key.storage_key(), error = %e, "availability read failed");
                    true
                }
            }
        })
        .take(super::collaborators::MAX_LIST_ROWS)
        .collect()
}

/// Back to the date step with the chosen date and its candidates forgotten.
fn rewind_to_date(state: ConversationState, ctx: &StepContext<'_>) -> ConversationState {
    let mut state = state;
    state.fields.date = None;
    state.fields.time = None;
    state.fields.candidates.clear();
    state.advance(Step::Date, ctx.now)
}

fn on_time(state: ConversationState, input: &NormalizedInput, ctx: &StepContext<'_>) -> Outcome {
    let typed = input.selection_id.is_none();
    if typed && CHANGE_DATE_WORDS.contains(&input.keyword().as_str()) {
        let state = rewind_to_date(state, ctx);
        let prompt = prompt_for(&state, ctx);
        return Transition::stay(state, vec![prompt]).into();
    }
    let Some(time) = resolve_time(input, &state.fields.candidates) else {
        // A typed date switches days without losing the collected fields.
        if typed && normalize::parse_date(&input.text, ctx.today).is_some() {
            return on_date(rewind_to_date(state, ctx), input, ctx);
        }
        return reprompt(state, "Please pick one of the listed times.", ctx);
    };
    let mut state = state;
    state.fields.time = Some(time);
    let state = state.advance(Step::TimeSelection, ctx.now);
    match state.fields.to_request() {
        Some(request) => Outcome::Effect(Effect::Reserve {
            request,
            pending: state,
        }),
        None => {
            tracing::warn!(
                target: "intake::dialogue",
                conversation = %state.conversation_id,
                "time chosen with incomplete fields"
            );
            Transition::clear(vec![prompts::generic_failure()]).into()
        }
    }
}

/// Finishes a booking attempt.
///
/// A full slot keeps every collected field: the taken time is dropped from the candidates
/// and the list is shown again, or the date is asked again when nothing is left.
pub fn after_reservation(
    pending: ConversationState,
    result: Result<BookingRecord, ReservationError>,
    ctx: &StepContext<'_>,
) -> Transition {
    match result {
        Ok(record) => Transition::clear(vec![prompts::confirmation(&record)]),
        Err(ReservationError::SlotFull) => {
            let mut state = pending;
            let taken = state.fields.time.take();
            state.fields.candidates.retain(|t| Some(*t) != taken);
            if state.fields.candidates.is_empty() {
                let date = state.fields.date.take();
                let state = state.advance(Step::Date, ctx.now);
                let mut replies = Vec::with_capacity(2);
                if let Some(date) = date {
                    replies.push(prompts::day_full(date));
                }
                replies.push(prompt_for(&state, ctx));
                Transition::stay(state, replies)
            } else {
                let state = state.advance(Step::TimeSelection, ctx.now);
                let mut replies = Vec::with_capacity(2);
                if let Some(time) = taken {
                    replies.push(prompts::slot_full(time));
                }
                replies.push(prompt_for(&state, ctx));
                Transition::stay(state, replies)
            }
        }
        Err(_) => Transition::clear(vec![prompts::generic_failure()]),
    }
}

/// Finishes a report lookup. Every outcome ends the session.
pub fn after_lookup(
    id: &str,
    result: Result<Option<BookingRecord>, StoreError>,
    document_url: Option<String>,
) -> Transition {
    match result {
        Ok(Some(record)) => {
            let mut replies = vec![prompts::report_summary(&record)];
            match document_url {
                Some(url) => replies.push(prompts::report_document(&record, url)),
                None => replies.push(prompts::report_unavailable()),
            }
            Transition::clear(replies)
        }
        Ok(None) => Transition::clear(vec![prompts::record_not_found(id)]),
        Err(_) => Transition::clear(vec![prompts::generic_failure()]),
    }
}

/// Relays the desk's answer and stays in support.
pub fn after_support(pending: ConversationState, answer: String) -> Transition {
    Transition::stay(pending, vec![Outbound::text(answer)])
}

fn parse_name(input: &str) -> Option<String> {
    let name = input.trim();
    let valid = !name.is_empty()
        && name.chars().count() <= MAX_NAME_LEN
        && name.chars().any(char::is_alphabetic)
        && name
            .chars()
            .all(|c| c.is_alphabetic() || matches!(c, ' ' | '-' | '\'' | '.'));
    valid.then(|| normalize::title_case(name))
}

fn resolve_department<'a>(input: &NormalizedInput, departments: &'a Departments) -> Option<&'a Department> {
    if let Some(pos) = input
        .selection_id
        .as_deref()
        .and_then(|id| id.strip_prefix("dept_"))
        .and_then(|n| n.parse::<usize>().ok())
    {
        return departments.by_position(pos);
    }
    if let Ok(pos) = input.text.parse::<usize>() {
        return departments.by_position(pos);
    }
    departments.get(&input.text)
}

fn resolve_time(input: &NormalizedInput, candidates: &[NaiveTime]) -> Option<NaiveTime> {
    let by_index = |n: usize| n.checked_sub(1).and_then(|i| candidates.get(i)).copied();
    if let Some(n) = input
        .selection_id
        .as_deref()
        .and_then(|id| id.strip_prefix("time_"))
        .and_then(|n| n.parse::<usize>().ok())
    {
        return by_index(n);
    }
    if let Ok(n) = input.text.parse::<usize>() {
        return by_index(n);
    }
    NaiveTime::parse_from_str(input.text.trim(), "%H:%M")
        .ok()
        .filter(|t| candidates.contains(t))
}
