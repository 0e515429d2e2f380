//! Human-readable pass summary.

use std::path::Path;

use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use trelldap_sync::ReconcileReport;

#[derive(Tabled)]
struct DepartedRow {
    #[tabled(rename = "uid")]
    uid: String,
    #[tabled(rename = "name")]
    fullname: String,
}

#[derive(Tabled)]
struct UnresolvedRow {
    #[tabled(rename = "uid")]
    uid: String,
    #[tabled(rename = "mail")]
    mail: String,
    #[tabled(rename = "error")]
    error: String,
}

#[derive(Tabled)]
struct GapRow {
    #[tabled(rename = "uid")]
    uid: String,
    #[tabled(rename = "trello user")]
    username: String,
    #[tabled(rename = "trello id")]
    platform_id: String,
}

pub fn print(report: &ReconcileReport, state_path: &Path) {
    println!(
        "{} {} members | {} new | {} resolved | {} not found | {} unresolved | {} departed",
        "✓".green().bold(),
        report.members,
        report.discovered.len(),
        report.resolved,
        report.not_found,
        report.unresolved.len(),
        report.departed.len(),
    );
    if report.rate_limit_waits > 0 || report.reconnects > 0 {
        println!(
            "  waited out {} rate limit(s), reconnected {} time(s)",
            report.rate_limit_waits, report.reconnects
        );
    }
    println!("  state: {}", state_path.display().to_string().bright_black());

    if !report.unresolved.is_empty() {
        println!();
        println!("{}", "UNRESOLVED (retried next run)".yellow().bold());
        let rows: Vec<UnresolvedRow> = report
            .unresolved
            .iter()
            .map(|u| UnresolvedRow {
                uid: u.uid.to_string(),
                mail: u.mail.clone(),
                error: u.error.clone(),
            })
            .collect();
        print_table(rows);
    }

    if !report.departed.is_empty() {
        println!();
        println!("{}", "NO LONGER IN DIRECTORY".red().bold());
        let rows: Vec<DepartedRow> = report
            .departed
            .iter()
            .map(|d| DepartedRow {
                uid: d.uid.to_string(),
                fullname: d.fullname.clone(),
            })
            .collect();
        print_table(rows);
    }

    match &report.not_in_organization {
        Some(gaps) if !gaps.is_empty() => {
            println!();
            println!("{}", "LINKED BUT OUTSIDE THE ORGANIZATION".magenta().bold());
            let rows: Vec<GapRow> = gaps
                .iter()
                .map(|g| GapRow {
                    uid: g.uid.to_string(),
                    username: g.username.clone(),
                    platform_id: g.platform_id.clone(),
                })
                .collect();
            print_table(rows);
        }
        _ => {}
    }
}

fn print_table<T: Tabled>(rows: Vec<T>) {
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}
