use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use organism_kernel::db::Database;
use organism_kernel::models::*;
use organism_kernel::{tree_render, Config, ContentTypeRegistry, Kernel, Ports};

#[derive(Parser)]
#[command(name = "orgk")]
#[command(about = "Governed, composable organisms on a local SQLite store")]
struct Cli {
    /// Database file (defaults to ORGANISM_KERNEL_DB, then the platform data directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// User id to act as
    #[arg(long = "as", global = true, default_value = "local")]
    actor: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and run migrations
    Init,
    /// List registered content types
    Types,
    /// Create an organism with its first state
    Create {
        content_type: String,
        /// Payload as JSON
        payload: String,
        /// Accept direct appends instead of requiring proposals
        #[arg(long)]
        open_trunk: bool,
    },
    /// Fork an organism from its current state
    Fork {
        source: Uuid,
        #[arg(long)]
        open_trunk: bool,
    },
    /// Append a state directly (open-trunk organisms only)
    Append {
        organism: Uuid,
        content_type: String,
        payload: String,
    },
    /// Nest one organism inside another
    Compose {
        parent: Uuid,
        child: Uuid,
        #[arg(long)]
        position: Option<i64>,
    },
    /// Remove a child from its parent
    Decompose { parent: Uuid, child: Uuid },
    /// Show or change visibility
    Visibility {
        organism: Uuid,
        /// public, members or private
        #[arg(value_parser = parse_visibility)]
        level: Option<VisibilityLevel>,
    },
    /// Switch open-trunk on or off
    OpenTrunk {
        organism: Uuid,
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
    /// Grant membership or integration authority
    Grant {
        organism: Uuid,
        user: String,
        /// membership or integration-authority
        #[arg(value_parser = parse_relationship_type)]
        kind: RelationshipType,
        /// founder or member (memberships only)
        #[arg(long, value_parser = parse_role)]
        role: Option<MembershipRole>,
    },
    /// Revoke a granted relationship
    Revoke { organism: Uuid, relationship: Uuid },
    /// Open a proposal against an organism
    Propose {
        organism: Uuid,
        /// Content type of the proposed state
        #[arg(long, requires = "payload", conflicts_with_all = ["compose", "decompose", "visibility"])]
        content_type: Option<String>,
        /// Proposed state payload as JSON
        #[arg(long, requires = "content_type")]
        payload: Option<String>,
        /// Propose nesting this organism
        #[arg(long, conflicts_with_all = ["decompose", "visibility"])]
        compose: Option<Uuid>,
        #[arg(long, requires = "compose")]
        position: Option<i64>,
        /// Propose removing this child
        #[arg(long, conflicts_with = "visibility")]
        decompose: Option<Uuid>,
        /// Propose a visibility change
        #[arg(long, value_parser = parse_visibility)]
        visibility: Option<VisibilityLevel>,
        #[arg(long, short)]
        description: Option<String>,
    },
    /// Run a proposal past its target's policies without resolving it
    Evaluate { proposal: Uuid },
    /// Evaluate and, if policies pass, apply a proposal
    Integrate { proposal: Uuid },
    /// Decline an open proposal
    Decline {
        proposal: Uuid,
        #[arg(long, short)]
        reason: Option<String>,
    },
    /// List proposals for an organism
    Proposals {
        organism: Uuid,
        /// Only open proposals
        #[arg(long)]
        open: bool,
    },
    /// Record an observation event
    Observe {
        organism: Uuid,
        /// Observation payload as JSON
        payload: String,
    },
    /// Show an organism with its current state, visibility and relationships
    Show { organism: Uuid },
    /// Show an organism's state history, oldest first
    History { organism: Uuid },
    /// Render the composition tree below an organism
    Tree { organism: Uuid },
    /// List recorded events
    Events { organism: Option<Uuid> },
}

fn parse_visibility(s: &str) -> Result<VisibilityLevel, String> {
    VisibilityLevel::from_str(s).ok_or_else(|| format!("unknown visibility level: {}", s))
}

fn parse_relationship_type(s: &str) -> Result<RelationshipType, String> {
    RelationshipType::from_str(s).ok_or_else(|| format!("unknown relationship type: {}", s))
}

fn parse_role(s: &str) -> Result<MembershipRole, String> {
    MembershipRole::from_str(s).ok_or_else(|| format!("unknown role: {}", s))
}

fn parse_payload(raw: &str) -> anyhow::Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("Payload is not valid JSON: {}", raw))
}

/// Logs go to stderr so stdout stays clean JSON.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "organism_kernel=info".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open_database(cli_db: Option<PathBuf>, config: &Config) -> anyhow::Result<Database> {
    let path = match cli_db {
        Some(path) => path,
        None => config.resolved_db_path()?,
    };
    tracing::debug!(path = %path.display(), "Opening database");
    let db = Database::open(path)?;
    db.migrate()?;
    Ok(db)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = Config::from_env();
    let db = open_database(cli.db, &config)?;
    let kernel = Kernel::new(
        Ports::from_store(db.clone()),
        ContentTypeRegistry::with_builtins(),
    )
    .with_default_visibility(config.default_visibility)
    .with_access_mode(config.access_mode);
    let actor = cli.actor;

    match cli.command {
        Commands::Init => {
            print_json(&json!({ "status": "ready" }))?;
        }
        Commands::Types => {
            let ids: Vec<String> = kernel
                .registry()
                .get_all()
                .iter()
                .map(|ct| ct.id().to_string())
                .collect();
            print_json(&ids)?;
        }
        Commands::Create {
            content_type,
            payload,
            open_trunk,
        } => {
            let genesis = kernel
                .create_organism(CreateOrganismInput {
                    content_type_id: content_type,
                    payload: parse_payload(&payload)?,
                    created_by: actor,
                    open_trunk: Some(open_trunk),
                })
                .await?;
            print_json(&genesis)?;
        }
        Commands::Fork { source, open_trunk } => {
            let genesis = kernel
                .fork_organism(ForkOrganismInput {
                    source_id: source,
                    forked_by: actor,
                    open_trunk: Some(open_trunk),
                })
                .await?;
            print_json(&genesis)?;
        }
        Commands::Append {
            organism,
            content_type,
            payload,
        } => {
            let state = kernel
                .append_state(AppendStateInput {
                    organism_id: organism,
                    content_type_id: content_type,
                    payload: parse_payload(&payload)?,
                    appended_by: actor,
                })
                .await?;
            print_json(&state)?;
        }
        Commands::Compose {
            parent,
            child,
            position,
        } => {
            let record = kernel
                .compose_organism(ComposeInput {
                    parent_id: parent,
                    child_id: child,
                    composed_by: actor,
                    position,
                })
                .await?;
            print_json(&record)?;
        }
        Commands::Decompose { parent, child } => {
            let record = kernel
                .decompose_organism(DecomposeInput {
                    parent_id: parent,
                    child_id: child,
                    decomposed_by: actor,
                })
                .await?;
            print_json(&record)?;
        }
        Commands::Visibility { organism, level } => match level {
            Some(level) => {
                let record = kernel.change_visibility(organism, level, &actor).await?;
                print_json(&record)?;
            }
            None => {
                let level = kernel.visibility_of(organism).await?;
                print_json(&json!({ "organismId": organism, "level": level }))?;
            }
        },
        Commands::OpenTrunk { organism, enabled } => {
            let organism = kernel.change_open_trunk(organism, enabled, &actor).await?;
            print_json(&organism)?;
        }
        Commands::Grant {
            organism,
            user,
            kind,
            role,
        } => {
            let relationship = kernel
                .grant_relationship(GrantRelationshipInput {
                    organism_id: organism,
                    user_id: user,
                    kind,
                    role,
                    granted_by: actor,
                })
                .await?;
            print_json(&relationship)?;
        }
        Commands::Revoke {
            organism,
            relationship,
        } => match kernel
            .revoke_relationship(relationship, organism, &actor)
            .await?
        {
            Some(revoked) => print_json(&revoked)?,
            None => bail!("relationship {} not found on organism {}", relationship, organism),
        },
        Commands::Propose {
            organism,
            content_type,
            payload,
            compose,
            position,
            decompose,
            visibility,
            description,
        } => {
            let mutation = match (content_type, payload, compose, decompose, visibility) {
                (Some(content_type_id), Some(payload), None, None, None) => {
                    ProposalMutation::AppendState {
                        content_type_id,
                        payload: parse_payload(&payload)?,
                    }
                }
                (None, None, Some(child_id), None, None) => {
                    ProposalMutation::Compose { child_id, position }
                }
                (None, None, None, Some(child_id), None) => ProposalMutation::Decompose { child_id },
                (None, None, None, None, Some(level)) => ProposalMutation::ChangeVisibility { level },
                _ => bail!(
                    "propose needs exactly one of --content-type/--payload, --compose, --decompose or --visibility"
                ),
            };
            let proposal = kernel
                .open_mutation_proposal(OpenProposalInput {
                    organism_id: organism,
                    mutation,
                    proposed_by: actor,
                    description,
                })
                .await?;
            print_json(&proposal)?;
        }
        Commands::Evaluate { proposal } => {
            let proposal = kernel
                .get_proposal(proposal)
                .await?
                .with_context(|| format!("proposal {} not found", proposal))?;
            let report = kernel.evaluate_proposal(&proposal).await?;
            print_json(&report)?;
        }
        Commands::Integrate { proposal } => {
            let outcome = kernel.integrate_proposal(proposal, &actor).await?;
            print_json(&outcome)?;
        }
        Commands::Decline { proposal, reason } => {
            let proposal = kernel.decline_proposal(proposal, &actor, reason).await?;
            print_json(&proposal)?;
        }
        Commands::Proposals { organism, open } => {
            let proposals = if open {
                kernel.open_proposals(organism).await?
            } else {
                kernel.list_proposals(organism).await?
            };
            print_json(&proposals)?;
        }
        Commands::Observe { organism, payload } => {
            let event = kernel
                .record_observation(organism, &actor, parse_payload(&payload)?)
                .await?;
            print_json(&event)?;
        }
        Commands::Show { organism: id } => {
            let organism = kernel
                .get_organism(id)
                .await?
                .with_context(|| format!("organism {} not found", id))?;
            print_json(&json!({
                "organism": organism,
                "currentState": kernel.current_state(id).await?,
                "visibility": kernel.visibility_of(id).await?,
                "parent": kernel.query_parent(id).await?,
                "children": kernel.query_children(id).await?,
                "relationships": kernel.relationships_of(id).await?,
            }))?;
        }
        Commands::History { organism } => {
            print_json(&kernel.state_history(organism).await?)?;
        }
        Commands::Tree { organism } => {
            let tree = kernel.subtree(organism).await?;
            print!("{}", tree_render::render_tree(&tree));
        }
        Commands::Events { organism } => {
            print_json(&db.get_events(organism)?)?;
        }
    }

    Ok(())
}
