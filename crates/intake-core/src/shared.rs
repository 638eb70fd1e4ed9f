//! Shared configuration and the immutable department table.

use crate::dialogue::MAX_LIST_ROWS;
use chrono::{Duration, NaiveTime};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Opening window and capacity of one department (resource class).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartmentConfig {
    pub name: String,
    /// First bookable time point, `HH:MM`.
    pub opens: String,
    /// Last bookable time point, `HH:MM` (inclusive).
    pub closes: String,
    /// Bookings allowed per (department, date, time).
    pub capacity: u32,
    #[serde(default = "default_slot_minutes")]
    pub slot_minutes: u32,
}

fn default_slot_minutes() -> u32 {
    60
}

impl DepartmentConfig {
    fn new(name: &str, opens: &str, closes: &str, capacity: u32) -> Self {
        Self {
            name: name.to_string(),
            opens: opens.to_string(),
            closes: closes.to_string(),
            capacity,
            slot_minutes: default_slot_minutes(),
        }
    }
}

fn default_departments() -> Vec<DepartmentConfig> {
    vec![
        DepartmentConfig::new("Cardiology", "09:00", "12:00", 10),
        DepartmentConfig::new("Neurology", "14:00", "17:00", 8),
        DepartmentConfig::new("Orthopedics", "10:00", "13:00", 6),
        DepartmentConfig::new("Pediatrics", "15:00", "18:00", 12),
        DepartmentConfig::new("General Medicine", "09:00", "12:00", 10),
        DepartmentConfig::new("Dermatology", "09:00", "18:00", 15),
    ]
}

/// Global application configuration (gateway, storage, transport, schedules). Load from TOML or env.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Application identity shown in greetings and `/v1/status`.
    pub app_name: String,
    /// HTTP port for the gateway.
    pub port: u16,
    /// Base directory for the sled database.
    pub storage_path: String,
    /// Idle seconds after which a conversation is abandoned.
    pub session_timeout_secs: u64,
    /// Prefix of minted booking identifiers (e.g. `P` -> `P1001`).
    pub record_prefix: String,
    /// Sequence value before the first allocation.
    pub sequence_start: u64,
    /// Country code prepended to bare local phone numbers (digits only).
    pub country_code: String,
    /// Expected digit count of a bare local phone number.
    pub local_phone_digits: usize,

    /// Webhook verification token (`hub.verify_token`).
    #[serde(default)]
    pub verify_token: String,
    #[serde(default)]
    pub whatsapp_token: Option<String>,
    #[serde(default)]
    pub phone_number_id: Option<String>,
    #[serde(default = "default_graph_api_base")]
    pub graph_api_base: String,
    /// Forwarding endpoint for support questions. Rule-based answers are used when unset.
    #[serde(default)]
    pub support_url: Option<String>,
    /// Base URL of the document renderer (`{base}/reports/{id}`).
    #[serde(default)]
    pub report_base_url: Option<String>,

    #[serde(default = "default_departments")]
    pub departments: Vec<DepartmentConfig>,
}

fn default_graph_api_base() -> String {
    "https://graph.facebook.com/v17.0".to_string()
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            app_name: "NovaMed Intake".to_string(),
            port: 8001,
            storage_path: "./data".to_string(),
            session_timeout_secs: 1800,
            record_prefix: "P".to_string(),
            sequence_start: 1000,
            country_code: "91".to_string(),
            local_phone_digits: 10,
            verify_token: String::new(),
            whatsapp_token: None,
            phone_number_id: None,
            graph_api_base: default_graph_api_base(),
            support_url: None,
            report_base_url: None,
            departments: default_departments(),
        }
    }
}

impl CoreConfig {
    /// Load config from file and environment. Precedence: env `INTAKE__*` > file at `INTAKE_CONFIG`
    /// (default `config/gateway.toml`) > defaults.
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("INTAKE_CONFIG").unwrap_or_else(|_| "config/gateway.toml".to_string());
        let builder = config::Config::builder()
            .set_default("app_name", "NovaMed Intake")?
            .set_default("port", 8001_i64)?
            .set_default("storage_path", "./data")?
            .set_default("session_timeout_secs", 1800_i64)?
            .set_default("record_prefix", "P")?
            .set_default("sequence_start", 1000_i64)?
            .set_default("country_code", "91")?
            .set_default("local_phone_digits", 10_i64)?;

        let path = Path::new(&config_path);
        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        let built = builder
            .add_source(config::Environment::with_prefix("INTAKE").separator("__"))
            .build()?;

        let cfg: Self = built.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects tables the engine cannot schedule against.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        Departments::from_config(&self.departments).map(|_| ())
    }

    pub fn departments(&self) -> Result<Departments, config::ConfigError> {
        Departments::from_config(&self.departments)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::seconds(self.session_timeout_secs.min(i64::MAX as u64) as i64)
    }
}

/// Validated schedule of one department.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Department {
    pub name: String,
    pub opens: NaiveTime,
    pub closes: NaiveTime,
    pub capacity: u32,
    pub slot_minutes: u32,
}

impl Department {
    /// Discrete bookable time points, from opening to closing inclusive.
    pub fn time_points(&self) -> Vec<NaiveTime> {
        let step = Duration::minutes(i64::from(self.slot_minutes));
        let mut out = Vec::new();
        let mut t = self.opens;
        while t <= self.closes {
            out.push(t);
            let (next, wrapped) = t.overflowing_add_signed(step);
            if wrapped != 0 || next <= t {
                break;
            }
            t = next;
        }
        out
    }

    pub fn offers(&self, time: NaiveTime) -> bool {
        self.time_points().contains(&time)
    }
}

/// Immutable resource configuration shared by the engine and the reservation service.
#[derive(Debug, Clone)]
pub struct Departments {
    list: Vec<Department>,
}

impl Departments {
    pub fn from_config(table: &[DepartmentConfig]) -> Result<Self, config::ConfigError> {
        if table.is_empty() {
            return Err(config::ConfigError::Message(
                "department table is empty".to_string(),
            ));
        }
        if table.len() > MAX_LIST_ROWS {
            return Err(config::ConfigError::Message(format!(
                "{} departments configured; a department list holds at most {}",
                table.len(),
                MAX_LIST_ROWS
            )));
        }
        let mut list = Vec::with_capacity(table.len());
        for d in table {
            let opens = parse_hhmm(&d.opens).ok_or_else(|| {
                config::ConfigError::Message(format!("{}: bad opening time '{}'", d.name, d.opens))
            })?;
            let closes = parse_hhmm(&d.closes).ok_or_else(|| {
                config::ConfigError::Message(format!("{}: bad closing time '{}'", d.name, d.closes))
            })?;
            if closes < opens {
                return Err(config::ConfigError::Message(format!(
                    "{}: closes before it opens",
                    d.name
                )));
            }
            if d.capacity == 0 || d.slot_minutes == 0 {
                return Err(config::ConfigError::Message(format!(
                    "{}: capacity and slot_minutes must be positive",
                    d.name
                )));
            }
            if list.iter().any(|x: &Department| x.name.eq_ignore_ascii_case(&d.name)) {
                return Err(config::ConfigError::Message(format!(
                    "duplicate department '{}'",
                    d.name
                )));
            }
            list.push(Department {
                name: d.name.clone(),
                opens,
                closes,
                capacity: d.capacity,
                slot_minutes: d.slot_minutes,
            });
        }
        Ok(Self { list })
    }

    pub fn all(&self) -> &[Department] {
        &self.list
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Exact (case-insensitive) lookup by name.
    pub fn get(&self, name: &str) -> Option<&Department> {
        self.list.iter().find(|d| d.name.eq_ignore_ascii_case(name.trim()))
    }

    /// 1-based lookup, matching the numbering shown to users.
    pub fn by_position(&self, position: usize) -> Option<&Department> {
        position.checked_sub(1).and_then(|i| self.list.get(i))
    }
}

impl Default for Departments {
    fn default() -> Self {
        // The built-in table always validates.
        Self::from_config(&default_departments()).unwrap_or(Self { list: Vec::new() })
    }
}

fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").ok()
}
