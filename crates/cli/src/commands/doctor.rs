use analyst_agent::prompts::{PromptLibrary, PromptTemplate};
use analyst_core::config::{AppConfig, LoadOptions};
use analyst_core::dataset::BaseTable;
use serde::Serialize;

use crate::commands::{block_on, open_database, CommandFailure};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: CheckStatus::Skipped,
            details: "skipped because configuration did not load".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

impl DoctorReport {
    fn from_checks(checks: Vec<DoctorCheck>) -> Self {
        let failed = checks.iter().filter(|check| check.status != CheckStatus::Pass).count();
        let (overall_status, summary) = if failed == 0 {
            (CheckStatus::Pass, "doctor: all readiness checks passed".to_string())
        } else {
            (CheckStatus::Fail, format!("doctor: {failed} of {} readiness checks did not pass", checks.len()))
        };
        Self { overall_status, summary, checks }
    }
}

pub fn run(json_output: bool) -> String {
    let report = DoctorReport::from_checks(collect_checks());

    if !json_output {
        return render_human(&report);
    }

    serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
        serde_json::json!({
            "overall_status": "fail",
            "summary": "doctor serialization failed",
            "error": error.to_string(),
        })
        .to_string()
    })
}

fn collect_checks() -> Vec<DoctorCheck> {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return vec![
                DoctorCheck::fail("config_validation", error.to_string()),
                DoctorCheck::skipped("dataset_load"),
                DoctorCheck::skipped("prompt_templates"),
                DoctorCheck::skipped("database_schema"),
            ];
        }
    };

    vec![
        DoctorCheck::pass("config_validation", "configuration loaded and validated"),
        check_dataset(&config),
        check_prompts(&config),
        check_database(&config),
    ]
}

fn check_dataset(config: &AppConfig) -> DoctorCheck {
    let path = config.dataset.path.display();
    match BaseTable::load(&config.dataset.path) {
        Ok(table) => DoctorCheck::pass("dataset_load", format!("loaded {} records from `{path}`", table.len())),
        Err(error) => DoctorCheck::fail("dataset_load", format!("`{path}`: {error}")),
    }
}

fn check_prompts(config: &AppConfig) -> DoctorCheck {
    let source = match &config.agent.prompts_dir {
        Some(dir) => format!("embedded defaults with overrides from `{}`", dir.display()),
        None => "embedded defaults".to_string(),
    };

    match PromptLibrary::load(config.agent.prompts_dir.as_deref()) {
        Ok(_) => DoctorCheck::pass(
            "prompt_templates",
            format!("{} templates parsed ({source})", PromptTemplate::ALL.len()),
        ),
        Err(error) => DoctorCheck::fail("prompt_templates", error.to_string()),
    }
}

/// Connects and applies pending migrations, so a pass means the stores are usable.
fn check_database(config: &AppConfig) -> DoctorCheck {
    let outcome = block_on("doctor", async {
        let pool = open_database(config).await?;
        pool.close().await;
        Ok::<(), CommandFailure>(())
    });

    match outcome {
        Ok(()) => DoctorCheck::pass(
            "database_schema",
            format!("connected to `{}` with migrations applied", config.database.url),
        ),
        Err(failure) => DoctorCheck::fail("database_schema", failure.output),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let lines = report.checks.iter().map(|check| {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        format!("- [{marker}] {}: {}", check.name, check.details)
    });

    std::iter::once(report.summary.clone()).chain(lines).collect::<Vec<_>>().join("\n")
}
