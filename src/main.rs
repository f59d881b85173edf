// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use fee_portal::config::{init_tracing, PortalConfig};
use fee_portal::dashboard::build_forecast;
use fee_portal::pricing::{checked_financing_plans, format_rand};
use fee_portal::service;
use fee_portal::{fees, setup_database, Declaration, DeclarationStatus, PlanId};
use rusqlite::Connection;
use std::env;
use std::sync::Mutex;

const USAGE: &str = "Usage:
  fee-portal init
  fee-portal plans <annual_fee> [students]
  fee-portal forecast <parent_id> [--csv]
  fee-portal reregister <parent_id> <plan> <signer_name> <city>
  fee-portal ui [parent_id]";

fn main() -> Result<()> {
    let config = PortalConfig::from_env();
    init_tracing(config.log_json);

    let args: Vec<String> = env::args().skip(1).collect();
    let arg = |i: usize| args.get(i).map(String::as_str);

    match arg(0) {
        Some("init") => run_init(&config)?,
        Some("plans") => {
            let annual = arg(1).context(USAGE)?.parse::<f64>().context("annual_fee must be a number")?;
            let students = arg(2).map(str::parse::<u32>).transpose()?.unwrap_or(1);
            run_plans(annual, students)?;
        }
        Some("forecast") => {
            let parent_id = arg(1).context(USAGE)?;
            run_forecast(&config, parent_id, args.iter().any(|a| a == "--csv"))?;
        }
        Some("reregister") => match (arg(1), arg(2), arg(3), arg(4)) {
            (Some(parent), Some(plan), Some(signer), Some(city)) => {
                run_reregister(&config, parent, plan, signer, city)?
            }
            _ => bail!("{}", USAGE),
        },
        Some("ui") | None => run_ui_mode(&config, arg(1))?,
        Some(other) => bail!("Unknown command '{}'\n{}", other, USAGE),
    }

    Ok(())
}

fn open_db(config: &PortalConfig) -> Result<Connection> {
    let conn = Connection::open(&config.db_path)
        .with_context(|| format!("Failed to open database at {}", config.db_path))?;
    setup_database(&conn)?;
    Ok(conn)
}

fn run_init(config: &PortalConfig) -> Result<()> {
    println!("🗄️  Database Setup - SQLite + WAL");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    println!("\n🔧 Setting up database...");
    let conn = open_db(config)?;
    println!("✓ Database initialized at {}", config.db_path);

    println!("\n💾 Seeding school fees...");
    let inserted = fees::seed_school_fees(&conn)?;
    let total = fees::all_fees(&conn)?.len();
    println!("✓ {} new fee rows ({} grades on record)", inserted, total);

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ Ready");
    Ok(())
}

fn run_plans(annual_fee: f64, students: u32) -> Result<()> {
    println!(
        "💳 Financing plans - annual fee R{}, {} student(s)",
        format_rand(annual_fee),
        students.max(1)
    );
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    for offer in checked_financing_plans(annual_fee, students)? {
        let star = if offer.recommended { " ★" } else { "" };
        println!(
            "  {:<24} R{:>10} {}{}",
            offer.title,
            format_rand(offer.price),
            offer.period,
            star
        );
    }
    Ok(())
}

fn run_forecast(config: &PortalConfig, parent_id: &str, csv: bool) -> Result<()> {
    let conn = open_db(config)?;
    let forecast = build_forecast(&conn, parent_id, Utc::now().date_naive(), config.default_annual_fee);

    if csv {
        forecast.write_csv(std::io::stdout())?;
        return Ok(());
    }

    println!("📈 Fee forecast for parent {}", parent_id);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    if forecast.is_fallback {
        println!("⚠️  No learners on record - showing sample data");
    }
    for m in &forecast.months {
        println!("  {:<16} R{:>10}", m.month, format_rand(m.total));
    }
    println!("\n  Remaining this year: R{}", format_rand(forecast.total_remaining));
    Ok(())
}

/// Run the whole wizard for every learner of a parent
fn run_reregister(config: &PortalConfig, parent_id: &str, plan: &str, signer: &str, city: &str) -> Result<()> {
    println!("📝 Re-registration for parent {}", parent_id);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let plan: PlanId = plan.parse()?;
    let db = Mutex::new(open_db(config)?);

    let mut wizard = {
        let conn = service::lock(&db)?;
        let login = service::login_by_id_number(&conn, parent_id)?;
        let session = service::load_session(&conn, &login.token)?;
        let mut wizard = service::start_wizard(&conn, session)?;

        let ids: Vec<String> = wizard.available().iter().map(|s| s.application_id.clone()).collect();
        wizard.select_students(&ids)?;
        println!("✓ Selected {} student(s)", ids.len());

        let report = service::apply_details(&conn, &mut wizard, &[], &config.email_rule)?;
        if !report.is_complete() {
            bail!("Student details could not be confirmed: {:?}", report.failed);
        }
        println!("✓ Details confirmed");

        service::choose_plan(&conn, &mut wizard, Some(plan))?;
        println!("✓ Plan: {}", plan.title());

        let declaration = Declaration {
            application_id: String::new(),
            agree_truth: true,
            agree_policies: true,
            agree_financial: true,
            agree_verification: true,
            agree_data_processing: true,
            agree_audit_storage: true,
            agree_affordability_processing: true,
            full_name: signer.to_string(),
            city: Some(city.to_string()),
            status: DeclarationStatus::Completed,
        };
        service::declare(&conn, &mut wizard, declaration)?;
        println!("✓ Declaration signed by {}", signer);

        let summary = service::review(&conn, &wizard, config.default_annual_fee)?;
        for line in &summary.lines {
            println!(
                "  {:<24} {:<9} R{:>10}",
                line.student_name,
                line.grade,
                format_rand(line.total_amount)
            );
        }
        println!("  Total: R{}", format_rand(summary.grand_total));

        wizard.acknowledge(true)?;
        wizard
    };

    let mailer = config.mailer();
    let runtime = tokio::runtime::Runtime::new()?;
    let report = runtime.block_on(service::submit_and_notify(&db, &mut wizard, mailer.as_ref()))?;

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("🎉 Submitted at {}", report.submitted_at.format("%Y-%m-%d %H:%M"));
    match report.email {
        Some(e) if e.delivered => println!("📧 Confirmation sent to {}", e.to),
        Some(e) => println!("⚠️  Confirmation email not sent: {}", e.error.unwrap_or_default()),
        None => println!("⚠️  No parent email on record"),
    }
    Ok(())
}

#[cfg(feature = "tui")]
fn run_ui_mode(config: &PortalConfig, parent_id: Option<&str>) -> Result<()> {
    use fee_portal::dashboard::{build_dashboard, DashboardData};
    use fee_portal::pricing::financing_plans;

    println!("🖥️  Loading School Fee Portal UI...\n");

    let conn = open_db(config)?;
    let today = Utc::now().date_naive();

    let (dashboard, forecast) = match parent_id {
        Some(id) => (
            build_dashboard(&conn, id, today, config.default_annual_fee)?,
            build_forecast(&conn, id, today, config.default_annual_fee),
        ),
        None => (
            DashboardData::empty(today),
            fee_portal::dashboard::FeeForecast::fallback(today),
        ),
    };

    let annual: f64 = dashboard.total_monthly_fees * 12.0;
    let annual = if annual > 0.0 { annual } else { config.default_annual_fee };
    let plans = financing_plans(annual, dashboard.total_learners.max(1) as u32);

    println!("✓ Loaded {} learner(s)\n", dashboard.total_learners);
    println!("Starting UI... (Press 'q' to quit)\n");

    let mut app = ui::App::new(dashboard, plans, forecast);
    ui::run_ui(&mut app)?;

    println!("\n✅ UI closed successfully");
    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_config: &PortalConfig, _parent_id: Option<&str>) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use the API: cargo run --bin fee-portal-server --features server");
    std::process::exit(1);
}
