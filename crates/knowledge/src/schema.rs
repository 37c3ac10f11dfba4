use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A development event queued for synchronization.  Created once by a
/// producer, consumed exactly once at flush, never mutated in between.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: Uuid,
    pub payload: EventPayload,
    /// Monotonic enqueue instant — drives the debounce window.
    pub enqueued_at: Instant,
    /// Wall-clock ingest time — rendered into the persisted note.
    pub ingested_at: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: &str, data: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload: EventPayload::classify(event_type, data),
            enqueued_at: Instant::now(),
            ingested_at: Utc::now(),
        }
    }

    pub fn event_type(&self) -> &str {
        self.payload.label()
    }
}

/// Closed set of recognized event shapes plus an opaque fallback.
///
/// Producers submit `(event_type, data)` pairs; recognized types get a typed
/// schema used when rendering the note body, everything else is carried as a
/// raw key-value block.
#[derive(Debug, Clone)]
pub enum EventPayload {
    PhaseTransition {
        from: String,
        to: String,
        extra: Map<String, Value>,
    },
    TaskCompletion {
        task_name: String,
        extra: Map<String, Value>,
    },
    ErrorResolution {
        error: String,
        solution: String,
        kind: String,
        context: Map<String, Value>,
    },
    GitCommit {
        message: String,
        extra: Map<String, Value>,
    },
    PeriodicBackup {
        message: String,
        extra: Map<String, Value>,
    },
    Opaque {
        event_type: String,
        data: Map<String, Value>,
    },
}

fn take_string(data: &mut Map<String, Value>, key: &str) -> Option<String> {
    match data.remove(key) {
        Some(Value::String(s)) => Some(s),
        Some(other) => {
            // Put non-string values back so they survive in `extra`.
            data.insert(key.to_string(), other);
            None
        }
        None => None,
    }
}

impl EventPayload {
    /// Sort a raw `(event_type, data)` pair into the typed union.  Missing
    /// required fields demote the event to `Opaque` rather than failing —
    /// producers are fire-and-forget.
    pub fn classify(event_type: &str, mut data: Map<String, Value>) -> Self {
        match event_type {
            "phase_transition" => {
                match (take_string(&mut data, "from"), take_string(&mut data, "to")) {
                    (Some(from), Some(to)) => EventPayload::PhaseTransition {
                        from,
                        to,
                        extra: data,
                    },
                    (from, to) => {
                        if let Some(from) = from {
                            data.insert("from".into(), Value::String(from));
                        }
                        if let Some(to) = to {
                            data.insert("to".into(), Value::String(to));
                        }
                        EventPayload::Opaque {
                            event_type: event_type.to_string(),
                            data,
                        }
                    }
                }
            }
            "task_completion" => match take_string(&mut data, "task_name") {
                Some(task_name) => EventPayload::TaskCompletion {
                    task_name,
                    extra: data,
                },
                None => EventPayload::Opaque {
                    event_type: event_type.to_string(),
                    data,
                },
            },
            "error_resolution" => {
                let complete = data.get("error").is_some_and(Value::is_string)
                    && data.get("solution").is_some_and(Value::is_string);
                if complete {
                    let error = take_string(&mut data, "error").expect("checked above");
                    let solution = take_string(&mut data, "solution").expect("checked above");
                    let kind = take_string(&mut data, "kind")
                        .unwrap_or_else(|| crate::resolve::extract_error_kind(&error));
                    let context = match data.remove("context") {
                        Some(Value::Object(map)) => map,
                        _ => Map::new(),
                    };
                    EventPayload::ErrorResolution {
                        error,
                        solution,
                        kind,
                        context,
                    }
                } else {
                    EventPayload::Opaque {
                        event_type: event_type.to_string(),
                        data,
                    }
                }
            }
            "git_commit" => match take_string(&mut data, "message") {
                Some(message) => EventPayload::GitCommit {
                    message,
                    extra: data,
                },
                None => EventPayload::Opaque {
                    event_type: event_type.to_string(),
                    data,
                },
            },
            "periodic_backup" => {
                let message = take_string(&mut data, "message").unwrap_or_default();
                EventPayload::PeriodicBackup {
                    message,
                    extra: data,
                }
            }
            _ => EventPayload::Opaque {
                event_type: event_type.to_string(),
                data,
            },
        }
    }

    pub fn label(&self) -> &str {
        match self {
            EventPayload::PhaseTransition { .. } => "phase_transition",
            EventPayload::TaskCompletion { .. } => "task_completion",
            EventPayload::ErrorResolution { .. } => "error_resolution",
            EventPayload::GitCommit { .. } => "git_commit",
            EventPayload::PeriodicBackup { .. } => "periodic_backup",
            EventPayload::Opaque { event_type, .. } => event_type,
        }
    }

    /// Render this payload as a markdown fragment for the batch note body.
    ///
    /// Error resolutions get a dedicated `## Solution` heading so the
    /// tier-1 lookup path can recover the fix verbatim later.
    pub fn render_markdown(&self, out: &mut String) {
        match self {
            EventPayload::PhaseTransition { from, to, extra } => {
                out.push_str(&format!("**Transition**: {from} -> {to}\n"));
                render_kv_block(extra, out);
            }
            EventPayload::TaskCompletion { task_name, extra } => {
                out.push_str(&format!("**Task**: {task_name}\n"));
                render_kv_block(extra, out);
            }
            EventPayload::ErrorResolution {
                error,
                solution,
                kind,
                context,
            } => {
                out.push_str(&format!("**Error** ({kind}): {error}\n\n"));
                out.push_str("## Solution\n\n");
                out.push_str(solution);
                out.push('\n');
                if !context.is_empty() {
                    out.push_str("\n**Context**:\n");
                    render_kv_block(context, out);
                }
            }
            EventPayload::GitCommit { message, extra } => {
                out.push_str(&format!("**Commit**: {message}\n"));
                render_kv_block(extra, out);
            }
            EventPayload::PeriodicBackup { message, extra } => {
                if !message.is_empty() {
                    out.push_str(&format!("{message}\n"));
                }
                render_kv_block(extra, out);
            }
            EventPayload::Opaque { data, .. } => {
                render_kv_block(data, out);
            }
        }
    }

    /// Raw view of the payload fields, used by the observation-rule lookup.
    pub fn field(&self, key: &str) -> Option<&Value> {
        let extra = match self {
            EventPayload::PhaseTransition { extra, .. } => extra,
            EventPayload::TaskCompletion { extra, .. } => extra,
            EventPayload::ErrorResolution { context, .. } => context,
            EventPayload::GitCommit { extra, .. } => extra,
            EventPayload::PeriodicBackup { extra, .. } => extra,
            EventPayload::Opaque { data, .. } => data,
        };
        extra.get(key)
    }
}

fn render_kv_block(data: &Map<String, Value>, out: &mut String) {
    for (key, value) in data {
        match value {
            Value::String(s) => out.push_str(&format!("- **{key}**: {s}\n")),
            other => out.push_str(&format!("- **{key}**: {other}\n")),
        }
    }
}

/// Serializable image of an event for the dead-letter log.  `enqueued_at`
/// is monotonic and meaningless across restarts, so only wall-clock time
/// survives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub id: Uuid,
    pub event_type: String,
    pub ingested_at: DateTime<Utc>,
    pub body: String,
}

impl DeadLetterRecord {
    pub fn from_event(event: &Event) -> Self {
        let mut body = String::new();
        event.payload.render_markdown(&mut body);
        Self {
            id: event.id,
            event_type: event.event_type().to_string(),
            ingested_at: event.ingested_at,
            body,
        }
    }
}

/// One ranked hit from the three-tier search pipeline.
/// `relevance_score` is a pure function of the other scalar fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub document_id: String,
    pub document_path: String,
    pub relevance_score: f64,
    pub tier1_score: f64,
    pub tier2_score: f64,
    pub tier3_score: f64,
    pub freshness_bonus: f64,
    pub usefulness_score: f64,
    pub matched_query: String,
    pub snippet: String,
}

/// Lightweight listing entry for `recent_notes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteSummary {
    pub path: String,
    pub date: NaiveDate,
    pub title: String,
    pub event_type: Option<String>,
    pub events_count: Option<i64>,
}
