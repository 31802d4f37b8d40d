//! Terminal output for CLI results

use anyhow::Result;
use serde::Serialize;

use handover::handover::{Delivery, HandoverOutcome};
use handover::models::{HandoverRecord, Invitation, PendingApproval, Role, RoleSlot, User};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn or_none<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

pub fn user(user: &User, json: bool) -> Result<()> {
    if json {
        return print_json(user);
    }
    println!(
        "User {} - {} <{}> ({})",
        user.id,
        user.full_name(),
        user.email,
        user.role.to_db()
    );
    Ok(())
}

pub fn outcome(outcome: &HandoverOutcome, json: bool) -> Result<()> {
    if json {
        return print_json(outcome);
    }
    println!(
        "{} handed over: {} -> {}",
        outcome.role.title(),
        or_none(outcome.from_user_id),
        outcome.to_user_id
    );
    println!("  Reassigned approvals: {}", outcome.reassigned);
    println!("  Audit record: {}", outcome.record.id);
    Ok(())
}

pub fn invitation(invitation: &Invitation, delivery: &Delivery, json: bool) -> Result<()> {
    if json {
        return print_json(&serde_json::json!({
            "invitation": invitation,
            "delivery": delivery,
        }));
    }
    println!(
        "Invitation {} for {} as {} (expires {})",
        invitation.id,
        invitation.email,
        invitation.role.title(),
        invitation.expires_at.format(TIME_FORMAT)
    );
    println!("  Sends: {}", invitation.send_count);
    match delivery {
        Delivery::Sent => println!("  Email sent."),
        Delivery::Failed { reason } => {
            println!("  Warning: email was not delivered ({}). The invitation is still valid; resend it later.", reason)
        }
    }
    Ok(())
}

pub fn holder(role: Role, slot: Option<&RoleSlot>, holder: Option<&User>, json: bool) -> Result<()> {
    if json {
        return print_json(&serde_json::json!({
            "role": role,
            "holder": holder,
            "assumed_at": slot.map(|s| s.assumed_at),
        }));
    }
    match (holder, slot) {
        (Some(user), Some(slot)) => println!(
            "{}: {} <{}> since {}",
            role.title(),
            user.full_name(),
            user.email,
            slot.assumed_at.format(TIME_FORMAT)
        ),
        _ => println!("{}: no holder assigned.", role.title()),
    }
    Ok(())
}

pub fn history(role: Role, records: &[HandoverRecord], json: bool) -> Result<()> {
    if json {
        return print_json(records);
    }
    if records.is_empty() {
        println!("No handovers recorded for {}.", role.title());
        return Ok(());
    }

    println!("{} handovers:", role.title());
    println!("{:─<60}", "");
    for record in records {
        println!(
            "  #{} {}  {} -> {}  by {}{}",
            record.id,
            record.created_at.format(TIME_FORMAT),
            or_none(record.from_user_id),
            record.to_user_id,
            or_none(record.performed_by),
            record
                .reason
                .as_deref()
                .map(|r| format!("  ({})", r))
                .unwrap_or_default()
        );
    }
    Ok(())
}

pub fn approvals(role: Role, approvals: &[PendingApproval], json: bool) -> Result<()> {
    if json {
        return print_json(approvals);
    }
    if approvals.is_empty() {
        println!("No approvals awaiting {}.", role.title());
        return Ok(());
    }

    println!("Approvals awaiting {}:", role.title());
    println!("{:─<60}", "");
    for approval in approvals {
        println!(
            "  #{} {} {}  approver: {}",
            approval.id,
            approval.subject_kind,
            approval.subject_id,
            or_none(approval.approver_id)
        );
    }
    Ok(())
}
