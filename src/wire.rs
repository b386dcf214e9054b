use std::io;
use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use ulid::Ulid;

use crate::ledger::{Ledger, LedgerError};
use crate::limits::MAX_FRAME_LEN;
use crate::model::{Appointment, AppointmentStatus, Ms, Slot};
use crate::observability;

/// One request per line: JSON tagged by `cmd`. Ids are ULID strings.
#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
    CreateSlot {
        business_id: Ulid,
        owner_id: Ulid,
        name: String,
        #[serde(default)]
        description: String,
        duration_min: u32,
    },
    UpdateSlot {
        id: Ulid,
        actor: Ulid,
        name: String,
        #[serde(default)]
        description: String,
        duration_min: u32,
    },
    SetSlotActive {
        id: Ulid,
        actor: Ulid,
        active: bool,
    },
    ListSlots {
        #[serde(default)]
        business_id: Option<Ulid>,
    },
    Book {
        slot_id: Ulid,
        user_id: Ulid,
        start: Ms,
        #[serde(default)]
        note: String,
    },
    Check {
        slot_id: Ulid,
        start: Ms,
    },
    NextAvailable {
        slot_id: Ulid,
    },
    Appointments {
        slot_id: Ulid,
    },
    UserAppointments {
        user_id: Ulid,
    },
    SetStatus {
        id: Ulid,
        actor: Ulid,
        status: AppointmentStatus,
    },
    Cancel {
        id: Ulid,
        actor: Ulid,
    },
}

/// One reply per line: JSON tagged by `reply`.
#[derive(Debug, Serialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Reply {
    AuthOk,
    Created {
        id: Ulid,
    },
    Updated {
        id: Ulid,
    },
    Slots {
        slots: Vec<Slot>,
    },
    Booked {
        id: Ulid,
        start: Ms,
        end: Ms,
    },
    Availability {
        available: bool,
    },
    /// `next_available: null` is the fully-booked answer, not an error.
    NextOpening {
        next_available: Option<Ms>,
    },
    Appointments {
        appointments: Vec<Appointment>,
    },
    StatusSet {
        id: Ulid,
        status: AppointmentStatus,
    },
    Cancelled {
        id: Ulid,
    },
    Error {
        code: &'static str,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        next_available: Option<Ms>,
    },
}

/// First frame a client must send before any command.
#[derive(Debug, Deserialize)]
struct Hello {
    password: String,
}

fn error_code(e: &LedgerError) -> &'static str {
    match e {
        LedgerError::NotFound(_) => "not_found",
        LedgerError::AlreadyExists(_) => "already_exists",
        LedgerError::Conflict { .. } => "conflict",
        LedgerError::SlotInactive(_) => "slot_inactive",
        LedgerError::StartInPast { .. } => "start_in_past",
        LedgerError::Forbidden(_) => "forbidden",
        LedgerError::InvalidTransition { .. } => "invalid_transition",
        LedgerError::CancelNotice { .. } => "cancel_notice",
        LedgerError::LimitExceeded(_) => "limit_exceeded",
        LedgerError::WalError(_) => "storage",
    }
}

fn error_reply(e: LedgerError) -> Reply {
    let next_available = match &e {
        LedgerError::Conflict { next_available, .. } => *next_available,
        _ => None,
    };
    Reply::Error {
        code: error_code(&e),
        message: e.to_string(),
        next_available,
    }
}

async fn dispatch(ledger: &Ledger, req: Request) -> Reply {
    let result = match req {
        Request::CreateSlot { business_id, owner_id, name, description, duration_min } => {
            let id = Ulid::new();
            ledger
                .create_slot(id, business_id, owner_id, name, description, duration_min)
                .await
                .map(|()| Reply::Created { id })
        }
        Request::UpdateSlot { id, actor, name, description, duration_min } => ledger
            .update_slot(id, actor, name, description, duration_min)
            .await
            .map(|()| Reply::Updated { id }),
        Request::SetSlotActive { id, actor, active } => ledger
            .set_slot_active(id, actor, active)
            .await
            .map(|()| Reply::Updated { id }),
        Request::ListSlots { business_id } => Ok(Reply::Slots {
            slots: ledger.list_slots(business_id).await,
        }),
        Request::Book { slot_id, user_id, start, note } => {
            let id = Ulid::new();
            ledger
                .book_appointment(id, slot_id, user_id, start, note)
                .await
                .map(|span| Reply::Booked { id, start: span.start, end: span.end })
        }
        Request::Check { slot_id, start } => ledger
            .check_availability(slot_id, start)
            .await
            .map(|available| Reply::Availability { available }),
        Request::NextAvailable { slot_id } => ledger
            .next_available(slot_id)
            .await
            .map(|next_available| Reply::NextOpening { next_available }),
        Request::Appointments { slot_id } => ledger
            .live_appointments(slot_id)
            .await
            .map(|appointments| Reply::Appointments { appointments }),
        Request::UserAppointments { user_id } => Ok(Reply::Appointments {
            appointments: ledger.user_appointments(user_id).await,
        }),
        Request::SetStatus { id, actor, status } => ledger
            .update_status(id, actor, status)
            .await
            .map(|()| Reply::StatusSet { id, status }),
        Request::Cancel { id, actor } => ledger
            .cancel_appointment(id, actor)
            .await
            .map(|()| Reply::Cancelled { id }),
    };
    result.unwrap_or_else(error_reply)
}

fn encode(reply: &Reply) -> Result<String, LinesCodecError> {
    serde_json::to_string(reply)
        .map_err(|e| LinesCodecError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))
}

/// Drive one client connection: authenticate the first frame, then answer
/// newline-delimited JSON commands until the peer hangs up.
pub async fn process_connection(
    socket: TcpStream,
    ledger: Arc<Ledger>,
    password: String,
) -> Result<(), LinesCodecError> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_FRAME_LEN));

    let Some(first) = framed.next().await else {
        return Ok(()); // hung up before hello
    };
    match serde_json::from_str::<Hello>(&first?) {
        Ok(hello) if hello.password == password => {
            framed.send(encode(&Reply::AuthOk)?).await?;
        }
        _ => {
            metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
            let reply = Reply::Error {
                code: "auth",
                message: "authentication failed".into(),
                next_available: None,
            };
            framed.send(encode(&reply)?).await?;
            return Ok(());
        }
    }

    while let Some(line) = framed.next().await {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let reply = match serde_json::from_str::<Request>(&line) {
            Ok(req) => {
                let label = observability::command_label(&req);
                let started = Instant::now();
                let reply = dispatch(&ledger, req).await;
                let status = if matches!(reply, Reply::Error { .. }) { "error" } else { "ok" };
                metrics::counter!(
                    observability::COMMANDS_TOTAL,
                    "command" => label,
                    "status" => status
                )
                .increment(1);
                metrics::histogram!(
                    observability::COMMAND_DURATION_SECONDS,
                    "command" => label
                )
                .record(started.elapsed().as_secs_f64());
                reply
            }
            Err(e) => Reply::Error {
                code: "parse",
                message: e.to_string(),
                next_available: None,
            },
        };
        framed.send(encode(&reply)?).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_parses_from_tagged_json() {
        let slot_id = Ulid::new();
        let user_id = Ulid::new();
        let line = format!(
            r#"{{"cmd":"book","slot_id":"{slot_id}","user_id":"{user_id}","start":1752141600000}}"#
        );
        let req: Request = serde_json::from_str(&line).unwrap();
        match req {
            Request::Book { slot_id: s, user_id: u, start, note } => {
                assert_eq!(s, slot_id);
                assert_eq!(u, user_id);
                assert_eq!(start, 1_752_141_600_000);
                assert!(note.is_empty()); // defaulted
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn status_parses_lowercase() {
        let id = Ulid::new();
        let actor = Ulid::new();
        let line =
            format!(r#"{{"cmd":"set_status","id":"{id}","actor":"{actor}","status":"confirmed"}}"#);
        let req: Request = serde_json::from_str(&line).unwrap();
        assert!(matches!(
            req,
            Request::SetStatus { status: AppointmentStatus::Confirmed, .. }
        ));
    }

    #[test]
    fn unknown_command_is_a_parse_error() {
        assert!(serde_json::from_str::<Request>(r#"{"cmd":"drop_tables"}"#).is_err());
    }

    #[test]
    fn reply_error_omits_absent_suggestion() {
        let json = serde_json::to_string(&Reply::Error {
            code: "forbidden",
            message: "nope".into(),
            next_available: None,
        })
        .unwrap();
        assert!(!json.contains("next_available"));

        let json = serde_json::to_string(&Reply::Error {
            code: "conflict",
            message: "taken".into(),
            next_available: Some(42),
        })
        .unwrap();
        assert!(json.contains(r#""next_available":42"#));
    }

    #[test]
    fn fully_booked_reply_keeps_explicit_null() {
        let json = serde_json::to_string(&Reply::NextOpening { next_available: None }).unwrap();
        assert_eq!(json, r#"{"reply":"next_opening","next_available":null}"#);
    }

    #[test]
    fn conflict_error_carries_suggestion() {
        let e = LedgerError::Conflict {
            with: Ulid::new(),
            next_available: Some(99),
        };
        assert_eq!(error_code(&e), "conflict");
        match error_reply(e) {
            Reply::Error { code, next_available, .. } => {
                assert_eq!(code, "conflict");
                assert_eq!(next_available, Some(99));
            }
            other => panic!("wrong reply: {other:?}"),
        }
    }
}
