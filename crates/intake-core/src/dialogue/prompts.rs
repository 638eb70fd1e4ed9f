//! User-facing message texts. Kept apart from the transitions so wording changes never touch flow.

use super::collaborators::{Choice, Outbound};
use crate::ledger::{BookingRecord, Gender};
use crate::normalize::PhoneRules;
use crate::shared::{Department, Departments};
use chrono::{NaiveDate, NaiveTime};

pub const BOOK_ID: &str = "opt_book";
pub const REPORT_ID: &str = "opt_report";
pub const SUPPORT_ID: &str = "opt_support";

fn date_label(date: NaiveDate) -> String {
    date.format("%Y-%m-%d (%a)").to_string()
}

fn time_label(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

pub fn menu(app_name: &str) -> Outbound {
    Outbound::buttons(
        format!("Welcome to {}! How can we help you today?", app_name),
        vec![
            Choice::new(BOOK_ID, "Book Appointment"),
            Choice::new(REPORT_ID, "Get Report"),
            Choice::new(SUPPORT_ID, "Support"),
        ],
    )
}

pub fn start_hint() -> Outbound {
    Outbound::text("Send 'Hi' to start.")
}

pub fn ask_first_name() -> Outbound {
    Outbound::text("Let's book your appointment. Please enter your first name.")
}

pub fn ask_last_name() -> Outbound {
    Outbound::text("Please enter your last name.")
}

pub fn ask_gender() -> Outbound {
    Outbound::buttons(
        "Please select your gender.",
        [Gender::Male, Gender::Female, Gender::Other]
            .iter()
            .map(|g| Choice::new(format!("g_{}", g.label().to_lowercase()), g.label()))
            .collect(),
    )
}

pub fn ask_address() -> Outbound {
    Outbound::text("Please enter your address.")
}

pub fn ask_email() -> Outbound {
    Outbound::text("Please enter your email address, or type 'skip'.")
}

pub fn ask_phone(rules: &PhoneRules) -> Outbound {
    Outbound::text(format!(
        "Please enter your {}-digit mobile number (or +{} followed by the number).",
        rules.local_digits, rules.country_code
    ))
}

pub fn ask_department(departments: &Departments) -> Outbound {
    let rows = departments
        .all()
        .iter()
        .enumerate()
        .map(|(i, d)| Choice::new(format!("dept_{}", i + 1), d.name.clone()))
        .collect();
    Outbound::list("Please choose a department.", "Departments", rows)
}

pub fn ask_date(department: &Department) -> Outbound {
    Outbound::text(format!(
        "{} is open {}-{}. Which date would you like? (YYYY-MM-DD, DD-MM-YYYY, 'today' or 'tomorrow')",
        department.name,
        time_label(department.opens),
        time_label(department.closes)
    ))
}

pub fn ask_time(department: &str, date: NaiveDate, candidates: &[NaiveTime]) -> Outbound {
    let rows = candidates
        .iter()
        .enumerate()
        .map(|(i, t)| Choice::new(format!("time_{}", i + 1), time_label(*t)))
        .collect();
    Outbound::list(
        format!("Available times for {} on {}:", department, date_label(date)),
        "Pick a time",
        rows,
    )
}

pub fn ask_report_id() -> Outbound {
    Outbound::text("Please enter your Patient ID (for example P1001).")
}

pub fn support_intro() -> Outbound {
    Outbound::text("Ask us anything about appointments, reports or timings. Type 'exit' to finish.")
}

pub fn support_goodbye() -> Outbound {
    Outbound::text("Thanks for reaching out. Send 'Hi' any time to start again.")
}

pub fn invalid(hint: &str) -> Outbound {
    Outbound::text(hint.to_string())
}

pub fn date_in_past() -> Outbound {
    Outbound::text("That date has already passed. Please choose today or a later date.")
}

pub fn no_times(date: NaiveDate) -> Outbound {
    Outbound::text(format!(
        "Sorry, every slot on {} is booked. Please choose another date.",
        date_label(date)
    ))
}

pub fn slot_full(time: NaiveTime) -> Outbound {
    Outbound::text(format!(
        "Sorry, the {} slot was just filled. Please pick another time or type a different date.",
        time_label(time)
    ))
}

pub fn day_full(date: NaiveDate) -> Outbound {
    Outbound::text(format!(
        "Sorry, the last slot on {} was just filled. Please choose another date.",
        date_label(date)
    ))
}

pub fn generic_failure() -> Outbound {
    Outbound::text("Something went wrong on our side. Please try again later by sending 'Hi'.")
}

pub fn confirmation(record: &BookingRecord) -> Outbound {
    Outbound::text(format!(
        "Appointment confirmed!\nPatient ID: {}\nName: {} {}\nDepartment: {}\nDate: {}\nTime: {}\nKeep your Patient ID to fetch reports later.",
        record.id,
        record.first_name,
        record.last_name,
        record.department,
        date_label(record.date),
        time_label(record.time)
    ))
}

pub fn record_not_found(id: &str) -> Outbound {
    Outbound::text(format!("No record found for Patient ID {}.", id))
}

pub fn report_summary(record: &BookingRecord) -> Outbound {
    Outbound::text(format!(
        "Patient ID: {}\nName: {} {}\nGender: {}\nDepartment: {}\nAppointment: {} {}",
        record.id,
        record.first_name,
        record.last_name,
        record.gender.label(),
        record.department,
        date_label(record.date),
        time_label(record.time)
    ))
}

pub fn report_document(record: &BookingRecord, url: String) -> Outbound {
    Outbound::Document {
        url,
        filename: format!("{}_report.pdf", record.id),
        caption: format!("Report for {} {}", record.first_name, record.last_name),
    }
}

pub fn report_unavailable() -> Outbound {
    Outbound::text("Report service is not configured yet. Please contact the front desk.")
}
