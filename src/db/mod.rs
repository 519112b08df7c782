//! SQLite storage for the kernel.
//!
//! [`Database`] exposes plain synchronous methods in the same shape as the
//! port traits, and implements every port by delegating to them. The
//! storage-level guarantees the kernel relies on are enforced by the schema:
//! `compositions.child_id` is the primary key, `states` is unique on
//! `(organism_id, sequence_number)`, and proposal resolution only updates
//! rows whose status is still `open`.

mod schema;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::models::*;
use crate::ports::*;

pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_default() -> Result<Self> {
        Self::open(default_path()?)
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.lock();
        schema::run_migrations(&conn)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database lock poisoned")
    }

    // ============================================================
    // Organism operations
    // ============================================================

    /// Write an organism, its first state and its stewardship in one transaction.
    pub fn save_genesis(&self, genesis: &OrganismGenesis) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let organism = &genesis.organism;
        tx.execute(
            "INSERT INTO organisms (id, created_at, created_by, open_trunk, forked_from_id)
             VALUES (?, ?, ?, ?, ?)",
            (
                organism.id.to_string(),
                organism.created_at.to_rfc3339(),
                &organism.created_by,
                organism.open_trunk as i32,
                organism.forked_from_id.map(|id| id.to_string()),
            ),
        )?;
        if !insert_state(&tx, &genesis.initial_state)? {
            anyhow::bail!(
                "initial state for organism {} was not written",
                organism.id
            );
        }
        insert_relationship(&tx, &genesis.stewardship)?;

        tx.commit()?;
        Ok(())
    }

    pub fn get_organism(&self, id: Uuid) -> Result<Option<Organism>> {
        let conn = self.lock();
        let organism = conn
            .query_row(
                "SELECT id, created_at, created_by, open_trunk, forked_from_id
                 FROM organisms WHERE id = ?",
                [id.to_string()],
                |row| {
                    Ok(Organism {
                        id: parse_uuid(row.get::<_, String>(0)?),
                        created_at: parse_datetime(row.get::<_, String>(1)?),
                        created_by: row.get(2)?,
                        open_trunk: row.get::<_, i32>(3)? != 0,
                        forked_from_id: row.get::<_, Option<String>>(4)?.map(parse_uuid),
                    })
                },
            )
            .optional()?;
        Ok(organism)
    }

    pub fn organism_exists(&self, id: Uuid) -> Result<bool> {
        let conn = self.lock();
        let count: i32 = conn.query_row(
            "SELECT COUNT(*) FROM organisms WHERE id = ?",
            [id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn set_open_trunk(&self, id: Uuid, open_trunk: bool) -> Result<()> {
        let conn = self.lock();
        let rows = conn.execute(
            "UPDATE organisms SET open_trunk = ? WHERE id = ?",
            (open_trunk as i32, id.to_string()),
        )?;
        if rows == 0 {
            anyhow::bail!("organism {} not found", id);
        }
        Ok(())
    }

    // ============================================================
    // State operations
    // ============================================================

    /// Returns `false` if the organism already has a state with this sequence number.
    pub fn append_state(&self, state: &OrganismState) -> Result<bool> {
        let conn = self.lock();
        insert_state(&conn, state)
    }

    pub fn get_current_state(&self, organism_id: Uuid) -> Result<Option<OrganismState>> {
        let conn = self.lock();
        let state = conn
            .query_row(
                "SELECT id, organism_id, content_type_id, payload, created_at, created_by,
                        sequence_number, parent_state_id
                 FROM states WHERE organism_id = ?
                 ORDER BY sequence_number DESC LIMIT 1",
                [organism_id.to_string()],
                state_from_row,
            )
            .optional()?;
        Ok(state)
    }

    pub fn get_state_history(&self, organism_id: Uuid) -> Result<Vec<OrganismState>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, organism_id, content_type_id, payload, created_at, created_by,
                    sequence_number, parent_state_id
             FROM states WHERE organism_id = ? ORDER BY sequence_number",
        )?;

        let states = stmt
            .query_map([organism_id.to_string()], state_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(states)
    }

    // ============================================================
    // Composition operations
    // ============================================================

    /// Returns `false` if the child already has a parent.
    pub fn save_composition(&self, record: &CompositionRecord) -> Result<bool> {
        let conn = self.lock();
        insert_composition(&conn, record)
    }

    pub fn remove_composition(&self, parent_id: Uuid, child_id: Uuid) -> Result<bool> {
        let conn = self.lock();
        delete_composition(&conn, parent_id, child_id)
    }

    pub fn get_parent(&self, child_id: Uuid) -> Result<Option<CompositionRecord>> {
        let conn = self.lock();
        let record = conn
            .query_row(
                "SELECT parent_id, child_id, composed_at, composed_by, position
                 FROM compositions WHERE child_id = ?",
                [child_id.to_string()],
                composition_from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn get_children(&self, parent_id: Uuid) -> Result<Vec<CompositionRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT parent_id, child_id, composed_at, composed_by, position
             FROM compositions WHERE parent_id = ? ORDER BY composed_at, rowid",
        )?;

        let mut children = stmt
            .query_map([parent_id.to_string()], composition_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        sort_siblings(&mut children);

        Ok(children)
    }

    // ============================================================
    // Relationship operations
    // ============================================================

    pub fn save_relationship(&self, relationship: &Relationship) -> Result<()> {
        let conn = self.lock();
        insert_relationship(&conn, relationship)
    }

    pub fn delete_relationship(&self, id: Uuid) -> Result<bool> {
        let conn = self.lock();
        let rows = conn.execute("DELETE FROM relationships WHERE id = ?", [id.to_string()])?;
        Ok(rows > 0)
    }

    pub fn get_relationships_for(&self, user_id: &str, organism_id: Uuid) -> Result<Vec<Relationship>> {
        self.query_relationships(
            "WHERE user_id = ? AND organism_id = ?",
            &[user_id, organism_id.to_string().as_str()],
        )
    }

    pub fn get_organism_relationships(&self, organism_id: Uuid) -> Result<Vec<Relationship>> {
        self.query_relationships("WHERE organism_id = ?", &[organism_id.to_string().as_str()])
    }

    pub fn get_user_relationships(&self, user_id: &str) -> Result<Vec<Relationship>> {
        self.query_relationships("WHERE user_id = ?", &[user_id])
    }

    fn query_relationships(&self, filter: &str, params: &[&str]) -> Result<Vec<Relationship>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, type, user_id, organism_id, role, created_at
             FROM relationships {} ORDER BY created_at, rowid",
            filter
        ))?;

        let relationships = stmt
            .query_map(rusqlite::params_from_iter(params), |row| {
                let kind: String = row.get(1)?;
                Ok((
                    kind,
                    Relationship {
                        id: parse_uuid(row.get::<_, String>(0)?),
                        kind: RelationshipType::Membership,
                        user_id: row.get(2)?,
                        organism_id: parse_uuid(row.get::<_, String>(3)?),
                        role: row
                            .get::<_, Option<String>>(4)?
                            .and_then(|r| MembershipRole::from_str(&r)),
                        created_at: parse_datetime(row.get::<_, String>(5)?),
                    },
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        relationships
            .into_iter()
            .map(|(kind, mut relationship)| -> Result<Relationship> {
                relationship.kind = RelationshipType::from_str(&kind)
                    .ok_or_else(|| anyhow::anyhow!("unknown relationship type: {}", kind))?;
                Ok(relationship)
            })
            .collect()
    }

    // ============================================================
    // Visibility operations
    // ============================================================

    pub fn save_visibility(&self, record: &VisibilityRecord) -> Result<()> {
        let conn = self.lock();
        upsert_visibility(&conn, record)
    }

    pub fn get_visibility(&self, organism_id: Uuid) -> Result<Option<VisibilityRecord>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT level, updated_at FROM visibility WHERE organism_id = ?",
                [organism_id.to_string()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        row.map(|(level, updated_at)| -> Result<VisibilityRecord> {
            Ok(VisibilityRecord {
                organism_id,
                level: VisibilityLevel::from_str(&level)
                    .ok_or_else(|| anyhow::anyhow!("unknown visibility level: {}", level))?,
                updated_at: parse_datetime(updated_at),
            })
        })
        .transpose()
    }

    // ============================================================
    // Proposal operations
    // ============================================================

    pub fn save_proposal(&self, proposal: &Proposal) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO proposals (id, organism_id, kind, mutation, description, proposed_by,
                                    status, created_at, resolved_at, resolved_by, decline_reason)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                proposal.id.to_string(),
                proposal.organism_id.to_string(),
                proposal.mutation.kind().as_str(),
                serde_json::to_string(&proposal.mutation)?,
                &proposal.description,
                &proposal.proposed_by,
                proposal.status.as_str(),
                proposal.created_at.to_rfc3339(),
                proposal.resolved_at.map(|t| t.to_rfc3339()),
                &proposal.resolved_by,
                &proposal.decline_reason,
            ),
        )?;
        Ok(())
    }

    /// Resolve a proposal only if it is still open. Returns whether this call won.
    pub fn resolve_proposal(&self, id: Uuid, resolution: &ProposalResolution) -> Result<bool> {
        let conn = self.lock();
        update_open_proposal(&conn, id, resolution)
    }

    /// Resolve an open proposal and apply its write in one transaction.
    ///
    /// A refused write rolls the resolution back, leaving the proposal open.
    pub fn integrate_proposal(
        &self,
        id: Uuid,
        resolution: &ProposalResolution,
        write: &ProposalWrite,
    ) -> Result<IntegrateWrite> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        if !update_open_proposal(&tx, id, resolution)? {
            return Ok(IntegrateWrite::NotOpen);
        }

        let written = match write {
            ProposalWrite::AppendState(state) => insert_state(&tx, state)?,
            ProposalWrite::Compose(record) => insert_composition(&tx, record)?,
            ProposalWrite::Decompose {
                parent_id,
                child_id,
            } => delete_composition(&tx, *parent_id, *child_id)?,
            ProposalWrite::ChangeVisibility(record) => {
                upsert_visibility(&tx, record)?;
                true
            }
        };
        if !written {
            tx.rollback()?;
            return Ok(IntegrateWrite::Refused);
        }

        tx.commit()?;
        Ok(IntegrateWrite::Applied)
    }

    pub fn get_proposal(&self, id: Uuid) -> Result<Option<Proposal>> {
        Ok(self
            .query_proposals("WHERE id = ?", &[id.to_string().as_str()])?
            .into_iter()
            .next())
    }

    pub fn get_proposals(&self, organism_id: Uuid) -> Result<Vec<Proposal>> {
        self.query_proposals("WHERE organism_id = ?", &[organism_id.to_string().as_str()])
    }

    pub fn get_open_proposals(&self, organism_id: Uuid) -> Result<Vec<Proposal>> {
        self.query_proposals(
            "WHERE organism_id = ? AND status = 'open'",
            &[organism_id.to_string().as_str()],
        )
    }

    fn query_proposals(&self, filter: &str, params: &[&str]) -> Result<Vec<Proposal>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, organism_id, mutation, description, proposed_by, status,
                    created_at, resolved_at, resolved_by, decline_reason
             FROM proposals {} ORDER BY created_at, rowid",
            filter
        ))?;

        let rows = stmt
            .query_map(rusqlite::params_from_iter(params), |row| {
                Ok(ProposalRow {
                    id: row.get(0)?,
                    organism_id: row.get(1)?,
                    mutation: row.get(2)?,
                    description: row.get(3)?,
                    proposed_by: row.get(4)?,
                    status: row.get(5)?,
                    created_at: row.get(6)?,
                    resolved_at: row.get(7)?,
                    resolved_by: row.get(8)?,
                    decline_reason: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(ProposalRow::into_proposal).collect()
    }

    // ============================================================
    // Event operations
    // ============================================================

    pub fn record_event(&self, event: &DomainEvent) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO events (id, type, organism_id, actor_id, occurred_at, payload)
             VALUES (?, ?, ?, ?, ?, ?)",
            (
                event.id.to_string(),
                event.kind.as_str(),
                event.organism_id.to_string(),
                &event.actor_id,
                event.occurred_at.to_rfc3339(),
                serde_json::to_string(&event.payload)?,
            ),
        )?;
        Ok(())
    }

    /// Recorded events in publication order, optionally for one organism.
    pub fn get_events(&self, organism_id: Option<Uuid>) -> Result<Vec<DomainEvent>> {
        let conn = self.lock();
        let (filter, params): (&str, Vec<String>) = match organism_id {
            Some(id) => ("WHERE organism_id = ?", vec![id.to_string()]),
            None => ("", Vec::new()),
        };
        let mut stmt = conn.prepare(&format!(
            "SELECT id, type, organism_id, actor_id, occurred_at, payload
             FROM events {} ORDER BY seq",
            filter
        ))?;

        let rows = stmt
            .query_map(rusqlite::params_from_iter(params), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, kind, organism_id, actor_id, occurred_at, payload)| -> Result<DomainEvent> {
                Ok(DomainEvent {
                    id: parse_uuid(id),
                    kind: EventType::from_str(&kind)
                        .ok_or_else(|| anyhow::anyhow!("unknown event type: {}", kind))?,
                    organism_id: parse_uuid(organism_id),
                    actor_id,
                    occurred_at: parse_datetime(occurred_at),
                    payload: serde_json::from_str(&payload)?,
                })
            })
            .collect()
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

/// `<data dir>/organism-kernel/kernel.db`, per platform conventions.
pub fn default_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "organism-kernel")
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
    Ok(dirs.data_dir().join("kernel.db"))
}

fn insert_state(conn: &Connection, state: &OrganismState) -> Result<bool> {
    let rows = conn.execute(
        "INSERT OR IGNORE INTO states (id, organism_id, content_type_id, payload, created_at,
                                       created_by, sequence_number, parent_state_id)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        (
            state.id.to_string(),
            state.organism_id.to_string(),
            &state.content_type_id,
            serde_json::to_string(&state.payload)?,
            state.created_at.to_rfc3339(),
            &state.created_by,
            state.sequence_number as i64,
            state.parent_state_id.map(|id| id.to_string()),
        ),
    )?;
    Ok(rows > 0)
}

fn insert_composition(conn: &Connection, record: &CompositionRecord) -> Result<bool> {
    let rows = conn.execute(
        "INSERT OR IGNORE INTO compositions (child_id, parent_id, composed_at, composed_by, position)
         VALUES (?, ?, ?, ?, ?)",
        (
            record.child_id.to_string(),
            record.parent_id.to_string(),
            record.composed_at.to_rfc3339(),
            &record.composed_by,
            record.position,
        ),
    )?;
    Ok(rows > 0)
}

fn delete_composition(conn: &Connection, parent_id: Uuid, child_id: Uuid) -> Result<bool> {
    let rows = conn.execute(
        "DELETE FROM compositions WHERE parent_id = ? AND child_id = ?",
        (parent_id.to_string(), child_id.to_string()),
    )?;
    Ok(rows > 0)
}

fn upsert_visibility(conn: &Connection, record: &VisibilityRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO visibility (organism_id, level, updated_at) VALUES (?, ?, ?)
         ON CONFLICT(organism_id) DO UPDATE SET level = excluded.level, updated_at = excluded.updated_at",
        (
            record.organism_id.to_string(),
            record.level.as_str(),
            record.updated_at.to_rfc3339(),
        ),
    )?;
    Ok(())
}

fn update_open_proposal(conn: &Connection, id: Uuid, resolution: &ProposalResolution) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE proposals SET status = ?, resolved_at = ?, resolved_by = ?, decline_reason = ?
         WHERE id = ? AND status = 'open'",
        (
            resolution.status.as_str(),
            resolution.resolved_at.to_rfc3339(),
            &resolution.resolved_by,
            &resolution.decline_reason,
            id.to_string(),
        ),
    )?;
    Ok(rows > 0)
}

fn insert_relationship(conn: &Connection, relationship: &Relationship) -> Result<()> {
    conn.execute(
        "INSERT INTO relationships (id, type, user_id, organism_id, role, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        (
            relationship.id.to_string(),
            relationship.kind.as_str(),
            &relationship.user_id,
            relationship.organism_id.to_string(),
            relationship.role.map(|r| r.as_str()),
            relationship.created_at.to_rfc3339(),
        ),
    )?;
    Ok(())
}

fn state_from_row(row: &Row<'_>) -> rusqlite::Result<OrganismState> {
    let payload: String = row.get(3)?;
    Ok(OrganismState {
        id: parse_uuid(row.get::<_, String>(0)?),
        organism_id: parse_uuid(row.get::<_, String>(1)?),
        content_type_id: row.get(2)?,
        payload: serde_json::from_str(&payload).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?,
        created_at: parse_datetime(row.get::<_, String>(4)?),
        created_by: row.get(5)?,
        sequence_number: row.get::<_, i64>(6)? as u64,
        parent_state_id: row.get::<_, Option<String>>(7)?.map(parse_uuid),
    })
}

fn composition_from_row(row: &Row<'_>) -> rusqlite::Result<CompositionRecord> {
    Ok(CompositionRecord {
        parent_id: parse_uuid(row.get::<_, String>(0)?),
        child_id: parse_uuid(row.get::<_, String>(1)?),
        composed_at: parse_datetime(row.get::<_, String>(2)?),
        composed_by: row.get(3)?,
        position: row.get(4)?,
    })
}

struct ProposalRow {
    id: String,
    organism_id: String,
    mutation: String,
    description: Option<String>,
    proposed_by: String,
    status: String,
    created_at: String,
    resolved_at: Option<String>,
    resolved_by: Option<String>,
    decline_reason: Option<String>,
}

impl ProposalRow {
    fn into_proposal(self) -> Result<Proposal> {
        Ok(Proposal {
            id: parse_uuid(self.id),
            organism_id: parse_uuid(self.organism_id),
            mutation: serde_json::from_str(&self.mutation)
                .context("Failed to decode stored proposal mutation")?,
            description: self.description,
            proposed_by: self.proposed_by,
            status: ProposalStatus::from_str(&self.status)
                .ok_or_else(|| anyhow::anyhow!("unknown proposal status: {}", self.status))?,
            created_at: parse_datetime(self.created_at),
            resolved_at: self.resolved_at.map(parse_datetime),
            resolved_by: self.resolved_by,
            decline_reason: self.decline_reason,
        })
    }
}

fn parse_uuid(s: String) -> Uuid {
    Uuid::parse_str(&s).unwrap_or_else(|_| Uuid::nil())
}

fn parse_datetime(s: String) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================
// Port implementations
// ============================================================

#[async_trait]
impl OrganismStore for Database {
    async fn save(&self, genesis: &OrganismGenesis) -> Result<()> {
        self.save_genesis(genesis)
    }

    async fn find_by_id(&self, id: OrganismId) -> Result<Option<Organism>> {
        self.get_organism(id)
    }

    async fn exists(&self, id: OrganismId) -> Result<bool> {
        self.organism_exists(id)
    }

    async fn set_open_trunk(&self, id: OrganismId, open_trunk: bool) -> Result<()> {
        Database::set_open_trunk(self, id, open_trunk)
    }
}

#[async_trait]
impl StateStore for Database {
    async fn append(&self, state: &OrganismState) -> Result<bool> {
        self.append_state(state)
    }

    async fn find_current_by_organism_id(
        &self,
        organism_id: OrganismId,
    ) -> Result<Option<OrganismState>> {
        self.get_current_state(organism_id)
    }

    async fn find_history(&self, organism_id: OrganismId) -> Result<Vec<OrganismState>> {
        self.get_state_history(organism_id)
    }
}

#[async_trait]
impl CompositionStore for Database {
    async fn save(&self, record: &CompositionRecord) -> Result<bool> {
        self.save_composition(record)
    }

    async fn remove(&self, parent_id: OrganismId, child_id: OrganismId) -> Result<bool> {
        self.remove_composition(parent_id, child_id)
    }

    async fn find_parent(&self, child_id: OrganismId) -> Result<Option<CompositionRecord>> {
        self.get_parent(child_id)
    }

    async fn find_children(&self, parent_id: OrganismId) -> Result<Vec<CompositionRecord>> {
        self.get_children(parent_id)
    }
}

#[async_trait]
impl RelationshipStore for Database {
    async fn save(&self, relationship: &Relationship) -> Result<()> {
        self.save_relationship(relationship)
    }

    async fn remove(&self, id: RelationshipId) -> Result<bool> {
        self.delete_relationship(id)
    }

    async fn find_by_user_and_organism(
        &self,
        user_id: &str,
        organism_id: OrganismId,
    ) -> Result<Vec<Relationship>> {
        self.get_relationships_for(user_id, organism_id)
    }

    async fn find_by_organism(&self, organism_id: OrganismId) -> Result<Vec<Relationship>> {
        self.get_organism_relationships(organism_id)
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Vec<Relationship>> {
        self.get_user_relationships(user_id)
    }
}

#[async_trait]
impl VisibilityStore for Database {
    async fn save(&self, record: &VisibilityRecord) -> Result<()> {
        self.save_visibility(record)
    }

    async fn find_by_organism_id(
        &self,
        organism_id: OrganismId,
    ) -> Result<Option<VisibilityRecord>> {
        self.get_visibility(organism_id)
    }
}

#[async_trait]
impl ProposalStore for Database {
    async fn save(&self, proposal: &Proposal) -> Result<()> {
        self.save_proposal(proposal)
    }

    async fn update(&self, id: ProposalId, resolution: &ProposalResolution) -> Result<bool> {
        self.resolve_proposal(id, resolution)
    }

    async fn integrate(
        &self,
        id: ProposalId,
        resolution: &ProposalResolution,
        write: &ProposalWrite,
    ) -> Result<IntegrateWrite> {
        self.integrate_proposal(id, resolution, write)
    }

    async fn find_by_id(&self, id: ProposalId) -> Result<Option<Proposal>> {
        self.get_proposal(id)
    }

    async fn find_by_organism_id(&self, organism_id: OrganismId) -> Result<Vec<Proposal>> {
        self.get_proposals(organism_id)
    }

    async fn find_open_by_organism_id(&self, organism_id: OrganismId) -> Result<Vec<Proposal>> {
        self.get_open_proposals(organism_id)
    }
}

#[async_trait]
impl EventPublisher for Database {
    async fn publish(&self, event: &DomainEvent) -> Result<()> {
        self.record_event(event)
    }
}
