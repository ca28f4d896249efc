//! Platform Administration CLI
//!
//! Operator tool for the language-learning platform: runs migrations and the
//! periodic jobs (purchase expiry, daily gamification reset), shows dashboard
//! numbers and works the teacher-application and refund review queues
//! without going through an HTTP API.

use clap::{Args, Parser, Subcommand, ValueEnum};
use dotenv::dotenv;
use serde::Serialize;
use uuid::Uuid;

use lingua_backend::{
    config::AppConfig,
    database::{run_migrations, Page, PageRequest},
    models::{
        ApplicationStatus, CourseFilter, CourseSort, CourseStatus, PaymentOutcome, Proficiency,
        RefundStatus, ReviewDecision, XpSource,
    },
    service::Services,
};

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Language-learning platform administration CLI
#[derive(Parser)]
#[command(
    name = "platform-admin",
    about = "Language-learning platform administration CLI",
    version
)]
struct Cli {
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Check that the database is reachable
    Health,
    /// Show dashboard statistics
    Stats,
    /// Show the most enrolled courses
    TopCourses(TopCoursesArgs),
    /// Expire pending purchases whose payment window has closed
    ExpirePurchases,
    /// Roll over daily XP counters and streaks for every learner
    DailyReset,
    /// Show the XP leaderboard
    Leaderboard(PageArgs),
    /// Grant XP to a user
    AwardXp(AwardXpArgs),
    /// Search courses
    Courses(CoursesArgs),
    /// List teacher applications
    Applications(ApplicationsArgs),
    /// Approve or reject a teacher application
    ReviewApplication(ReviewArgs),
    /// List refund requests
    Refunds(RefundsArgs),
    /// Approve or reject a refund request
    ReviewRefund(ReviewArgs),
    /// Apply a payment reported by the gateway
    ConfirmPayment(ConfirmPaymentArgs),
}

#[derive(Args)]
struct PageArgs {
    /// Page number, starting at 1
    #[arg(long)]
    page: Option<u32>,

    /// Rows per page (default 20, at most 100)
    #[arg(long)]
    page_size: Option<u32>,
}

impl PageArgs {
    fn request(&self) -> PageRequest {
        PageRequest::from_options(self.page, self.page_size)
    }
}

#[derive(Args)]
struct TopCoursesArgs {
    /// Number of courses to show
    #[arg(short, long, default_value = "10")]
    limit: i64,
}

#[derive(Args)]
struct AwardXpArgs {
    /// User ID
    user_id: Uuid,

    /// Activity the XP is for (e.g. lesson_completed, manual)
    #[arg(short, long, default_value = "manual")]
    source: XpSource,

    /// XP to grant; defaults to the source's standard amount
    #[arg(short, long)]
    amount: Option<i32>,
}

#[derive(Clone, Copy, ValueEnum)]
enum SortArg {
    Newest,
    PriceAsc,
    PriceDesc,
    Title,
}

impl From<SortArg> for CourseSort {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Newest => CourseSort::Newest,
            SortArg::PriceAsc => CourseSort::PriceLowToHigh,
            SortArg::PriceDesc => CourseSort::PriceHighToLow,
            SortArg::Title => CourseSort::Title,
        }
    }
}

#[derive(Args)]
struct CoursesArgs {
    /// Language tag, e.g. "es"
    #[arg(short, long)]
    language: Option<String>,

    /// CEFR level (A1-C2)
    #[arg(long)]
    proficiency: Option<Proficiency>,

    /// Course status (draft, published, archived)
    #[arg(long)]
    status: Option<CourseStatus>,

    /// Only courses by this teacher
    #[arg(long)]
    teacher: Option<Uuid>,

    #[arg(long)]
    min_price: Option<i64>,

    #[arg(long)]
    max_price: Option<i64>,

    /// Text to find in title or description
    #[arg(short, long)]
    search: Option<String>,

    #[arg(long, value_enum, default_value = "newest")]
    sort: SortArg,

    #[command(flatten)]
    paging: PageArgs,
}

#[derive(Args)]
struct ApplicationsArgs {
    /// Filter by status (pending, approved, rejected)
    #[arg(long, default_value = "pending")]
    status: ApplicationStatus,

    #[command(flatten)]
    paging: PageArgs,
}

#[derive(Args)]
struct RefundsArgs {
    /// Filter by status (pending, approved, rejected)
    #[arg(long, default_value = "pending")]
    status: RefundStatus,

    #[command(flatten)]
    paging: PageArgs,
}

#[derive(Clone, Copy, ValueEnum)]
enum DecisionArg {
    Approve,
    Reject,
}

impl From<DecisionArg> for ReviewDecision {
    fn from(arg: DecisionArg) -> Self {
        match arg {
            DecisionArg::Approve => ReviewDecision::Approve,
            DecisionArg::Reject => ReviewDecision::Reject,
        }
    }
}

#[derive(Args)]
struct ReviewArgs {
    /// ID of the application or refund request
    id: Uuid,

    /// Admin user making the decision
    #[arg(long)]
    admin: Uuid,

    #[arg(long, value_enum)]
    decision: DecisionArg,

    /// Note stored with the decision
    #[arg(short, long)]
    note: Option<String>,
}

#[derive(Args)]
struct ConfirmPaymentArgs {
    /// Gateway order code
    order_code: i64,

    /// Amount the gateway reports as paid
    #[arg(short, long)]
    amount: i64,

    /// Gateway transaction reference
    #[arg(short, long)]
    reference: Option<String>,
}

#[tokio::main]
async fn main() -> CliResult {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();

    let config = AppConfig::from_env()?;
    config.validate()?;
    let database_pool = config.database.create_pool().await?;

    if let Commands::Migrate = cli.command {
        println!("🔧 Running database migrations...");
        run_migrations(&database_pool).await?;
        println!("✅ Database is up to date");
        return Ok(());
    }

    let services = Services::new(database_pool, &config);
    let json = cli.json;

    match cli.command {
        Commands::Migrate => {}
        Commands::Health => health(&services, json).await?,
        Commands::Stats => show_stats(&services, json).await?,
        Commands::TopCourses(args) => top_courses(&services, args, json).await?,
        Commands::ExpirePurchases => expire_purchases(&services, json).await?,
        Commands::DailyReset => daily_reset(&services, json).await?,
        Commands::Leaderboard(args) => leaderboard(&services, args, json).await?,
        Commands::AwardXp(args) => award_xp(&services, args, json).await?,
        Commands::Courses(args) => list_courses(&services, args, json).await?,
        Commands::Applications(args) => list_applications(&services, args, json).await?,
        Commands::ReviewApplication(args) => review_application(&services, args, json).await?,
        Commands::Refunds(args) => list_refunds(&services, args, json).await?,
        Commands::ReviewRefund(args) => review_refund(&services, args, json).await?,
        Commands::ConfirmPayment(args) => confirm_payment(&services, args, json).await?,
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_page_footer<T>(page: &Page<T>) {
    println!();
    println!(
        "Page {} of {} ({} total)",
        page.page,
        page.total_pages().max(1),
        page.total_count
    );
}

async fn health(services: &Services, json: bool) -> CliResult {
    services.users.health_check().await?;
    if json {
        return print_json(&serde_json::json!({ "database": "ok" }));
    }

    println!("✅ Database connection is healthy");
    Ok(())
}

async fn show_stats(services: &Services, json: bool) -> CliResult {
    let stats = services.admin.dashboard_stats().await?;
    if json {
        return print_json(&stats);
    }

    println!("📊 Platform Statistics");
    println!();
    println!("👥 Users: {}", stats.total_users());
    println!("   Learners: {}", stats.learners);
    println!("   Teachers: {}", stats.teachers);
    println!("   Admins: {}", stats.admins);
    println!();
    println!("📚 Courses:");
    println!("   Published: {}", stats.published_courses);
    println!("   Draft: {}", stats.draft_courses);
    println!("   Archived: {}", stats.archived_courses);
    println!();
    println!("🎓 Enrollments:");
    println!("   Active: {}", stats.active_enrollments);
    println!("   Completed: {}", stats.completed_enrollments);
    println!();
    println!("💰 Payments ({}):", services.purchases.currency());
    println!("   Revenue: {}", stats.paid_revenue);
    println!("   Refunded: {}", stats.refunded_amount);
    println!("   Pending purchases: {}", stats.pending_purchases);
    println!();
    println!("📝 Review queue: {}", stats.review_backlog());
    println!("   Refund requests: {}", stats.pending_refund_requests);
    println!(
        "   Teacher applications: {}",
        stats.pending_teacher_applications
    );
    println!();
    println!("Generated: {}", stats.generated_at.format("%Y-%m-%d %H:%M:%S UTC"));

    Ok(())
}

async fn top_courses(services: &Services, args: TopCoursesArgs, json: bool) -> CliResult {
    let courses = services.admin.top_courses(args.limit).await?;
    if json {
        return print_json(&courses);
    }

    println!("🏆 Top courses");
    println!();
    println!(
        "{:<4} {:<38} {:<32} {:>11} {:>14}",
        "#", "ID", "Title", "Enrollments", "Revenue"
    );
    println!("{}", "-".repeat(103));
    for (index, course) in courses.iter().enumerate() {
        println!(
            "{:<4} {:<38} {:<32} {:>11} {:>14}",
            index + 1,
            course.course_id,
            truncate_string(&course.title, 31),
            course.enrollment_count,
            course.revenue
        );
    }

    Ok(())
}

async fn expire_purchases(services: &Services, json: bool) -> CliResult {
    let expired = services.purchases.expire_stale_purchases().await?;
    if json {
        return print_json(&serde_json::json!({ "expired": expired }));
    }

    println!("⏰ Expired {} stale pending purchases", expired);
    Ok(())
}

async fn daily_reset(services: &Services, json: bool) -> CliResult {
    let reset = services.gamification.run_daily_reset_all().await?;
    if json {
        return print_json(&serde_json::json!({ "reset": reset }));
    }

    println!("🌅 Daily reset rolled over {} profiles", reset);
    Ok(())
}

async fn leaderboard(services: &Services, args: PageArgs, json: bool) -> CliResult {
    let page = services.gamification.leaderboard(args.request()).await?;
    if json {
        return print_json(&page);
    }

    println!("🏅 XP Leaderboard");
    println!();
    println!(
        "{:<6} {:<30} {:>10} {:>6} {:>7}",
        "Rank", "Name", "XP", "Level", "Streak"
    );
    println!("{}", "-".repeat(63));
    for entry in &page.items {
        println!(
            "{:<6} {:<30} {:>10} {:>6} {:>7}",
            entry.rank,
            truncate_string(&entry.name, 29),
            entry.total_xp,
            entry.level,
            entry.current_streak
        );
    }
    print_page_footer(&page);

    Ok(())
}

async fn award_xp(services: &Services, args: AwardXpArgs, json: bool) -> CliResult {
    let award = services
        .gamification
        .award_xp(args.user_id, args.source, args.amount)
        .await?;
    if json {
        return print_json(&award);
    }

    let progress = award.profile.progress();
    println!("✨ Awarded {} XP ({})", award.awarded, award.source);
    println!("   Total XP: {}", award.profile.total_xp);
    println!(
        "   Level: {} ({}% to level {})",
        progress.level,
        progress.percent,
        progress.level + 1
    );
    println!(
        "   Today: {}/{} XP, streak {} days",
        award.profile.today_xp, award.profile.daily_goal, award.profile.current_streak
    );
    if award.leveled_up {
        println!(
            "🎉 Level up! {} → {}",
            award.previous_level, award.profile.level
        );
    }

    Ok(())
}

async fn list_courses(services: &Services, args: CoursesArgs, json: bool) -> CliResult {
    let filter = CourseFilter {
        language: args.language,
        proficiency: args.proficiency,
        teacher_id: args.teacher,
        status: args.status,
        min_price: args.min_price,
        max_price: args.max_price,
        search: args.search,
    };

    let page = services
        .courses
        .list_courses(filter, args.sort.into(), args.paging.request())
        .await?;
    if json {
        return print_json(&page);
    }

    if page.items.is_empty() {
        println!("No courses found.");
        return Ok(());
    }

    println!(
        "{:<38} {:<32} {:<6} {:<5} {:>12} {:<10}",
        "ID", "Title", "Lang", "Level", "Price", "Status"
    );
    println!("{}", "-".repeat(108));
    for course in &page.items {
        println!(
            "{:<38} {:<32} {:<6} {:<5} {:>12} {:<10}",
            course.id,
            truncate_string(&course.title, 31),
            course.language,
            course.proficiency.to_string(),
            course.price,
            course.status.to_string()
        );
    }
    print_page_footer(&page);

    Ok(())
}

async fn list_applications(services: &Services, args: ApplicationsArgs, json: bool) -> CliResult {
    let page = services
        .applications
        .list_applications(Some(args.status), args.paging.request())
        .await?;
    if json {
        return print_json(&page);
    }

    if page.items.is_empty() {
        println!("No {} teacher applications.", args.status);
        return Ok(());
    }

    println!(
        "{:<38} {:<38} {:<16} {:<20}",
        "ID", "User", "Languages", "Submitted"
    );
    println!("{}", "-".repeat(115));
    for application in &page.items {
        println!(
            "{:<38} {:<38} {:<16} {:<20}",
            application.id,
            application.user_id,
            truncate_string(&application.languages.join(","), 15),
            application.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    print_page_footer(&page);

    Ok(())
}

async fn review_application(services: &Services, args: ReviewArgs, json: bool) -> CliResult {
    let application = services
        .applications
        .review_application(args.id, args.admin, args.decision.into(), args.note)
        .await?;
    if json {
        return print_json(&application);
    }

    println!(
        "✅ Application {} is now {}",
        application.id, application.status
    );
    if application.status == ApplicationStatus::Approved {
        println!("   User {} can now publish courses", application.user_id);
    }

    Ok(())
}

async fn list_refunds(services: &Services, args: RefundsArgs, json: bool) -> CliResult {
    let page = services
        .purchases
        .list_refund_requests(Some(args.status), args.paging.request())
        .await?;
    if json {
        return print_json(&page);
    }

    if page.items.is_empty() {
        println!("No {} refund requests.", args.status);
        return Ok(());
    }

    println!(
        "{:<38} {:<38} {:<20} {:<30}",
        "ID", "Purchase", "Requested", "Reason"
    );
    println!("{}", "-".repeat(129));
    for request in &page.items {
        println!(
            "{:<38} {:<38} {:<20} {:<30}",
            request.id,
            request.purchase_id,
            request.created_at.format("%Y-%m-%d %H:%M"),
            truncate_string(&request.reason, 29)
        );
    }
    print_page_footer(&page);

    Ok(())
}

async fn review_refund(services: &Services, args: ReviewArgs, json: bool) -> CliResult {
    let outcome = services
        .purchases
        .review_refund(args.id, args.admin, args.decision.into(), args.note)
        .await?;
    if json {
        return print_json(&outcome);
    }

    println!(
        "✅ Refund request {} {}",
        outcome.request.id, outcome.request.status
    );
    println!(
        "   Order {}: {} {} ({})",
        outcome.purchase.order_code,
        outcome.purchase.amount,
        outcome.purchase.currency,
        outcome.purchase.status
    );
    if outcome.revoked_enrollment.is_some() {
        println!("   Course access revoked");
    }

    Ok(())
}

async fn confirm_payment(services: &Services, args: ConfirmPaymentArgs, json: bool) -> CliResult {
    let outcome = services
        .purchases
        .confirm_payment(args.order_code, args.amount, args.reference)
        .await?;
    if json {
        return print_json(&outcome);
    }

    match &outcome {
        PaymentOutcome::Paid { enrollment, .. } => {
            println!("✅ Order {} paid", args.order_code);
            println!(
                "   Learner {} enrolled in course {}",
                enrollment.learner_id, enrollment.course_id
            );
        }
        PaymentOutcome::AlreadyProcessed { purchase } => {
            println!(
                "ℹ️  Order {} was already {}; nothing changed",
                args.order_code, purchase.status
            );
        }
        PaymentOutcome::Failed { purchase } => {
            println!("❌ Order {} failed", args.order_code);
            if let Some(reason) = &purchase.failure_reason {
                println!("   {}", reason);
            }
        }
        PaymentOutcome::Refunded { reason, .. } => {
            println!("↩️  Order {} refunded: {}", args.order_code, reason);
        }
    }

    Ok(())
}

fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}
