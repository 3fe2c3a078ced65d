//! `foundry approvals ...`

use colored::Colorize;

use foundry_core::{ApprovalGuard, ApprovalStatus, PendingApproval};

const PREVIEW_LINES: usize = 3;

pub async fn list(guard: &ApprovalGuard, all: bool, json: bool) -> anyhow::Result<()> {
    let entries = if all {
        guard.list_all().await
    } else {
        guard.list_pending().await
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("{}", if all { "No approvals." } else { "No pending approvals." });
        return Ok(());
    }
    for entry in &entries {
        println!("{}\n", render(entry));
    }
    Ok(())
}

pub async fn approve(guard: &ApprovalGuard, id: &str) -> anyhow::Result<()> {
    match guard.approve(id).await? {
        Some(entry) => println!("{} {}", "approved".green().bold(), entry.file_path),
        None => anyhow::bail!("approval {id} not found or not pending"),
    }
    Ok(())
}

pub async fn deny(guard: &ApprovalGuard, id: &str) -> anyhow::Result<()> {
    match guard.deny(id).await? {
        Some(entry) => println!("{} {}", "denied".red().bold(), entry.file_path),
        None => anyhow::bail!("approval {id} not found or not pending"),
    }
    Ok(())
}

pub async fn clear(guard: &ApprovalGuard) -> anyhow::Result<()> {
    let removed = guard.clear_resolved().await?;
    println!("Removed {removed} resolved approval(s).");
    Ok(())
}

fn render(entry: &PendingApproval) -> String {
    let status = match entry.status {
        ApprovalStatus::Pending => entry.status.to_string().yellow(),
        ApprovalStatus::Approved => entry.status.to_string().green(),
        ApprovalStatus::Denied => entry.status.to_string().red(),
    };
    let mut out = format!(
        "{} {} [{}]\n  requested {}",
        entry.id.bold(),
        entry.file_path,
        status,
        entry.requested_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if !entry.reason.is_empty() {
        out.push_str(&format!("\n  reason: {}", entry.reason));
    }

    let lines: Vec<&str> = entry.content.lines().collect();
    for line in lines.iter().take(PREVIEW_LINES) {
        out.push_str(&format!("\n  | {line}"));
    }
    if lines.len() > PREVIEW_LINES {
        out.push_str(&format!("\n  | ... ({} more lines)", lines.len() - PREVIEW_LINES));
    }
    out
}
