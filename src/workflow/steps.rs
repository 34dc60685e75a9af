//! Step handlers.
//!
//! Each handler runs to completion within one tick and reports what the
//! engine should do next. Handlers that talk to the operator go through the
//! session's correlator, so a handler called while its request is in flight
//! only polls for the reply.

use std::path::PathBuf;
use std::task::Poll;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::{Claim, OnInvalid, Persist, Source, Step, Transition};
use crate::net::RequestTag;
use crate::pow::timed_search;
use crate::session::{Negotiation, Notice, Outbound, ServerReply, Session, SessionError};
use crate::store::{self, EncryptedBundle};
use crate::types::{zeros_for_value, Unit, ValidationTarget};

/// Run the handler for `step`
pub(super) fn run(step: Step, session: &mut Session) -> Result<Transition, SessionError> {
    match step {
        Step::Prepare(source) => prepare(session, source),
        Step::Connect => connect(session),
        Step::AwaitConnection => await_connection(session),
        Step::ExchangeCertificates => exchange_certificates(session),
        Step::RequestZeroes => request_zeroes(session),
        Step::CalculateUnit => calculate_unit(session),
        Step::RequestValidation(on_invalid) => request_validation(session, on_invalid),
        Step::Persist(what) => persist(session, what),
        Step::Submit(claim) => submit(session, claim),
        Step::HashOfUnit => hash_of_unit(session),
        Step::Exit => Ok(Transition::Exit),
    }
}

fn input_path(session: &Session) -> Result<PathBuf, SessionError> {
    session
        .args
        .unit_file
        .clone()
        .ok_or(SessionError::MissingContext("unit file"))
}

fn output_path(session: &Session) -> Result<PathBuf, SessionError> {
    session
        .args
        .output
        .clone()
        .ok_or(SessionError::MissingContext("output path"))
}

fn prepare(session: &mut Session, source: Source) -> Result<Transition, SessionError> {
    let unit = match source {
        Source::NewUnit => {
            let operator = session
                .args
                .operator
                .ok_or(SessionError::MissingContext("operator address"))?;
            session.progress.operator = Some(operator);
            return Ok(Transition::Next);
        }
        Source::DisplayedUnit => {
            let unit = store::read_unit(&input_path(session)?)?;
            session.reporter.report(Notice::UnitContents(unit.clone()));
            unit
        }
        Source::StoredUnit => store::read_unit(&input_path(session)?)?,
        Source::TransferredUnit => receive_unit(session)?,
    };

    info!(operator = %unit.operator, zero_bits = unit.required_zero_bits, "unit loaded");
    session.progress.operator = Some(unit.operator);
    session.progress.unit = Some(unit);
    Ok(Transition::Next)
}

/// Open a sealed bundle, falling back to a plain unit file when the input
/// is readable but is not a bundle for us.
fn receive_unit(session: &mut Session) -> Result<Unit, SessionError> {
    let path = input_path(session)?;
    match store::open_bundle(&path, session.channel.cipher.as_ref()) {
        Ok(unit) => Ok(unit),
        Err(e) if e.is_content_error() => {
            warn!(path = %path.display(), error = %e, "not a sealed bundle");
            session.reporter.report(Notice::PlainUnitFallback(e.to_string()));
            Ok(store::read_unit(&path)?)
        }
        Err(e) => Err(e.into()),
    }
}

fn connect(session: &mut Session) -> Result<Transition, SessionError> {
    let operator = session.progress.operator()?;
    let endpoint = session.resolver.resolve(&operator)?;
    info!(%operator, %endpoint, "connecting");
    session.channel.transport.connect(&endpoint)?;
    session.progress.endpoint = Some(endpoint);
    Ok(Transition::Next)
}

fn await_connection(session: &mut Session) -> Result<Transition, SessionError> {
    match session.channel.transport.poll_connected() {
        Poll::Pending => Ok(Transition::Stay),
        Poll::Ready(Ok(())) => {
            if let Some(endpoint) = session.progress.endpoint.clone() {
                session.reporter.report(Notice::Connected(endpoint));
            }
            Ok(Transition::Next)
        }
        Poll::Ready(Err(e)) => Err(e.into()),
    }
}

fn exchange_certificates(session: &mut Session) -> Result<Transition, SessionError> {
    let operator = session.progress.operator()?;
    match session.negotiator.step(&mut session.channel, &operator)? {
        Negotiation::Pending => Ok(Transition::Stay),
        Negotiation::Established(id) => {
            session.reporter.report(Notice::SessionEstablished {
                id: id.clone(),
                level: session.negotiator.level(),
            });
            session.progress.session_id = Some(id);
            Ok(Transition::Next)
        }
        Negotiation::Rejected(reason) => {
            session.reporter.report(Notice::CertificateFailed(reason));
            Ok(Transition::Stay)
        }
        Negotiation::Downgraded { from, to } => {
            session.reporter.report(Notice::Downgraded { from, to });
            Ok(Transition::Stay)
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ZeroesReply {
    Bare(u8),
    Object { zeroes: u8 },
}

fn parse_zeroes(reply: Vec<u8>) -> Result<u8, SessionError> {
    match serde_json::from_slice(&reply) {
        Ok(ZeroesReply::Bare(n) | ZeroesReply::Object { zeroes: n }) => Ok(n),
        Err(e) => Err(SessionError::Reply(format!("{}: {e}", RequestTag::Zeroes))),
    }
}

fn parse_target(reply: Vec<u8>) -> Result<ValidationTarget, SessionError> {
    serde_json::from_slice(&reply)
        .map_err(|e| SessionError::Reply(format!("{}: {e}", RequestTag::Validation)))
}

fn parse_server_reply(reply: Vec<u8>) -> Result<ServerReply, SessionError> {
    serde_json::from_slice(&reply).map_err(|e| SessionError::Reply(e.to_string()))
}

/// Refuse targets above the configured ceiling before any search starts
fn check_zero_bits(session: &Session, zero_bits: u8, source: &str) -> Result<u8, SessionError> {
    let ceiling = session.config.max_zero_bits;
    if zero_bits > ceiling {
        return Err(SessionError::Reply(format!(
            "{source}: {zero_bits} zero bits exceeds the limit of {ceiling}"
        )));
    }
    Ok(zero_bits)
}

fn request_zeroes(session: &mut Session) -> Result<Transition, SessionError> {
    let operator = session.progress.operator()?;
    let poll = session.channel.exchange(
        &operator,
        |_| Ok(Outbound::bare(RequestTag::Zeroes)),
        parse_zeroes,
    )?;
    let Poll::Ready(zero_bits) = poll else {
        return Ok(Transition::Stay);
    };

    let zero_bits = check_zero_bits(session, zero_bits, RequestTag::Zeroes.as_str())?;
    debug!(zero_bits, "difficulty target");
    session.progress.zero_bits = Some(zero_bits);
    Ok(Transition::Next)
}

fn calculate_unit(session: &mut Session) -> Result<Transition, SessionError> {
    let operator = session.progress.operator()?;
    let poll = session.channel.exchange(
        &operator,
        |_| Ok(Outbound::bare(RequestTag::Validation)),
        parse_target,
    )?;
    let Poll::Ready(target) = poll else {
        return Ok(Transition::Stay);
    };
    session.progress.target = Some(target);

    let zero_bits = match session.args.unit_value {
        Some(value) => {
            session.reporter.report(Notice::SpecificValue(value));
            check_zero_bits(session, zeros_for_value(value, &target), "--value")?
        }
        None => session.progress.zero_bits()?,
    };
    session.progress.zero_bits = Some(zero_bits);
    session.reporter.report(Notice::Searching { zero_bits });

    let spinner = session
        .reporter
        .spinner(format!("Mining a {zero_bits}-bit unit"));
    let report = timed_search(
        session.pow.as_ref(),
        session.args.search_mode,
        &operator,
        &session.identity,
        zero_bits,
    );
    spinner.finish_and_clear();

    info!(
        zero_bits,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "unit found"
    );
    session.reporter.report(Notice::SearchTime(report.elapsed));
    session.progress.unit = Some(report.unit);
    Ok(Transition::Next)
}

fn request_validation(
    session: &mut Session,
    on_invalid: OnInvalid,
) -> Result<Transition, SessionError> {
    let operator = session.progress.operator()?;
    let poll = session.channel.exchange(
        &operator,
        |_| Ok(Outbound::bare(RequestTag::Validation)),
        parse_target,
    )?;
    let Poll::Ready(target) = poll else {
        return Ok(Transition::Stay);
    };

    let value = session.pow.score(session.progress.unit()?, &target);
    session.progress.target = Some(target);
    session.progress.value = Some(value);
    session.reporter.report(Notice::UnitValue(value));

    if !value.is_invalid() {
        return Ok(Transition::Next);
    }
    match on_invalid {
        OnInvalid::Retarget => {
            warn!(k = target.k, "unit below target, retargeting");
            Ok(Transition::Goto(Step::RequestZeroes))
        }
        OnInvalid::Report => Ok(Transition::Next),
        OnInvalid::Exit => Ok(Transition::Exit),
    }
}

fn persist(session: &mut Session, what: Persist) -> Result<Transition, SessionError> {
    let unit = session.progress.unit()?.clone();
    let extensions = session.config.extensions.clone();

    let path = match what {
        Persist::MinedUnit => store::save_unit(&output_path(session)?, &extensions.unit, &unit)?,
        Persist::ReceivedUnit => {
            store::save_unit(&input_path(session)?, &extensions.unit, &unit)?
        }
        Persist::SealedBundle => {
            let recipient = session
                .args
                .counterparty
                .ok_or(SessionError::MissingContext("new owner address"))?;
            let bundle = EncryptedBundle::seal(
                session.channel.cipher.as_ref(),
                session.identity,
                &unit,
                &recipient,
            )?;
            store::save_bundle(&output_path(session)?, &extensions.bundle, &bundle)?
        }
    };

    info!(path = %path.display(), "saved");
    session.reporter.report(Notice::Saved(path.clone()));
    if what == Persist::SealedBundle {
        session
            .reporter
            .report(Notice::UnitHash(session.pow.content_hash(&unit)));
    }
    session.progress.saved.push(path);
    Ok(Transition::Next)
}

fn submit(session: &mut Session, claim: Claim) -> Result<Transition, SessionError> {
    let operator = session.progress.operator()?;
    let proto = session.progress.unit()?.to_text();

    let (tag, body) = match claim {
        Claim::Prototype => (RequestTag::Prototype, proto),
        Claim::ReleaseOwnerless => (
            RequestTag::ReleaseOwnerless,
            json!({ "diceProto": proto }).to_string(),
        ),
        Claim::CurrentOwner => {
            let new_owner = session
                .args
                .counterparty
                .ok_or(SessionError::MissingContext("new owner address"))?;
            (
                RequestTag::CurrentOwnerClaim,
                json!({ "newOwner": new_owner.to_hex_dash(), "diceProto": proto }).to_string(),
            )
        }
        Claim::NewOwner => (
            RequestTag::NewOwnerClaim,
            json!({ "newOwner": session.identity.to_hex_dash(), "diceProto": proto })
                .to_string(),
        ),
    };

    let poll = session.channel.exchange(
        &operator,
        |cipher| {
            let payload = cipher.encrypt(body.as_bytes(), &operator)?;
            Ok(Outbound::with_payload(tag, payload))
        },
        parse_server_reply,
    )?;
    let Poll::Ready(reply) = poll else {
        return Ok(Transition::Stay);
    };

    info!(%tag, status = %reply.status, "claim answered");
    session.reporter.report(Notice::ServerReply(reply));
    Ok(Transition::Next)
}

fn hash_of_unit(session: &mut Session) -> Result<Transition, SessionError> {
    let hash = session.pow.content_hash(session.progress.unit()?);
    session.reporter.report(Notice::UnitHash(hash));
    Ok(Transition::Next)
}
