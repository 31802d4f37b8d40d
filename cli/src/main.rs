//! Handover CLI - operator tool for singleton role handovers
//!
//! Talks to the database directly through the handover library, so it can
//! bootstrap a role that has no holder yet.

mod display;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use handover::config::CoreConfig;
use handover::handover::{Authority, HandoverService};
use handover::models::{NewUser, Profile, Role, UserId, UserRole};
use handover::store::Store;
use handover::token;

#[derive(Parser)]
#[command(name = "handover-cli")]
#[command(about = "Operator tool for role handovers and invitations")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    core: CoreConfig,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ProfileArgs {
    /// Email address
    #[arg(long)]
    email: String,

    /// First name
    #[arg(long)]
    first_name: String,

    /// Middle name
    #[arg(long)]
    middle_name: Option<String>,

    /// Last name
    #[arg(long)]
    last_name: String,
}

impl From<ProfileArgs> for Profile {
    fn from(args: ProfileArgs) -> Self {
        Profile {
            email: args.email,
            first_name: args.first_name,
            middle_name: args.middle_name,
            last_name: args.last_name,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Give a user the role attribute so they become eligible for handover
    GrantRole {
        /// Role to grant (dean, associate_dean, admin_assistant)
        role: Role,

        #[command(flatten)]
        profile: ProfileArgs,
    },

    /// Hand a role to an existing, eligible user
    Handover {
        role: Role,

        /// User receiving the role
        #[arg(long)]
        to: UserId,

        /// User recorded as performing the handover; not checked against the ledger
        #[arg(long)]
        performed_by: Option<UserId>,

        #[arg(long)]
        reason: Option<String>,
    },

    /// Create a new pre-verified officer and hand them the role
    CreateAndHandover {
        role: Role,

        #[command(flatten)]
        profile: ProfileArgs,

        #[arg(long)]
        performed_by: Option<UserId>,

        #[arg(long)]
        reason: Option<String>,
    },

    /// Propose a handover by emailing an activation link
    Invite {
        role: Role,

        #[command(flatten)]
        profile: ProfileArgs,

        /// Inviting user; must be the current holder
        #[arg(long)]
        invited_by: UserId,

        #[arg(long)]
        reason: Option<String>,
    },

    /// Resend the pending invitation for an email
    Resend {
        email: String,

        /// Requesting user; must be the original inviter
        #[arg(long = "as")]
        as_user: UserId,
    },

    /// Show the current holder of a role
    Holder { role: Role },

    /// Show the handover history of a role
    History { role: Role },

    /// List awaiting-decision approvals routed to a role
    Pending { role: Role },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "handover=info,handover_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    let store = Store::connect(&cli.core.database_url, cli.core.max_connections)
        .await
        .with_context(|| format!("Failed to open {}", cli.core.database_url))?;
    store.migrate().await?;

    let service = HandoverService::new(store, cli.core.mailer(), cli.core.activation_urls())
        .with_settings(cli.core.settings());
    let json = cli.json;

    match cli.command {
        Commands::GrantRole { role, profile } => run_grant_role(&service, role, profile.into(), json).await,
        Commands::Handover {
            role,
            to,
            performed_by,
            reason,
        } => {
            let outcome = service
                .handover_role(role, to, Authority::Operator(performed_by), reason)
                .await?;
            display::outcome(&outcome, json)
        }
        Commands::CreateAndHandover {
            role,
            profile,
            performed_by,
            reason,
        } => {
            let (user, outcome) = service
                .create_and_handover(role, profile.into(), Authority::Operator(performed_by), reason)
                .await?;
            display::user(&user, json)?;
            display::outcome(&outcome, json)
        }
        Commands::Invite {
            role,
            profile,
            invited_by,
            reason,
        } => {
            let receipt = service
                .propose_invitation(role, profile.into(), invited_by, reason)
                .await?;
            display::invitation(&receipt.invitation, &receipt.delivery, json)
        }
        Commands::Resend { email, as_user } => {
            let receipt = service
                .resend_invitation(&email.trim().to_lowercase(), as_user)
                .await?;
            display::invitation(&receipt.invitation, &receipt.delivery, json)
        }
        Commands::Holder { role } => {
            let slot = service.store().role_slot(role).await?;
            let holder = service.store().current_holder(role).await?;
            display::holder(role, slot.as_ref(), holder.as_ref(), json)
        }
        Commands::History { role } => {
            let records = service.store().history_for(role).await?;
            display::history(role, &records, json)
        }
        Commands::Pending { role } => {
            let approvals = service.store().awaiting_for(role).await?;
            display::approvals(role, &approvals, json)
        }
    }
}

/// Set the active role attribute, creating the user if needed.
///
/// This only makes the user eligible; authority still moves through a
/// handover.
async fn run_grant_role(service: &HandoverService, role: Role, profile: Profile, json: bool) -> Result<()> {
    let store = service.store();
    let user = match store.find_user_by_email(&profile.email).await? {
        Some(existing) => {
            store.set_user_role(existing.id, &UserRole::Active(role)).await?;
            tracing::info!(user_id = existing.id, role = %role, "Granted role attribute");
            store
                .find_user(existing.id)
                .await?
                .context("User disappeared while granting role")?
        }
        None => {
            let user = store
                .create_user(&NewUser {
                    profile,
                    role: UserRole::Active(role),
                    credential: token::unusable_credential(),
                    verified: true,
                })
                .await?;
            tracing::info!(user_id = user.id, role = %role, "Created user with role attribute");
            user
        }
    };

    display::user(&user, json)
}
