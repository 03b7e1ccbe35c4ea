use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::info;

use crate::pipeline::{Profile, RunArtifacts};

const DB_FILE: &str = "profile.sqlite";
const JSON_FILE: &str = "profile.json";
const HOMEPAGE_FILE: &str = "homepage.html";

/// Files written for one run.
#[derive(Debug)]
pub struct WrittenArtifacts {
    pub database: PathBuf,
    pub json: PathBuf,
    pub homepage: Option<PathBuf>,
}

/// Write `<output_dir>/<slug>/{profile.sqlite, profile.json, homepage.html}`,
/// replacing any previous run of the same store.
pub fn write_artifacts(output_dir: &Path, artifacts: &RunArtifacts) -> Result<WrittenArtifacts> {
    let profile = &artifacts.profile;
    let dir = output_dir.join(&profile.store.slug);
    fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let database = dir.join(DB_FILE);
    if database.exists() {
        fs::remove_file(&database)
            .with_context(|| format!("Failed to replace {}", database.display()))?;
    }
    let conn = connect(&database)?;
    init_schema(&conn)?;
    save_profile(&conn, profile)?;

    let json = dir.join(JSON_FILE);
    let body = serde_json::to_string_pretty(profile)?;
    fs::write(&json, body).with_context(|| format!("Failed to write {}", json.display()))?;

    let homepage = match &artifacts.homepage_html {
        Some(html) => {
            let path = dir.join(HOMEPAGE_FILE);
            fs::write(&path, html).with_context(|| format!("Failed to write {}", path.display()))?;
            Some(path)
        }
        None => None,
    };

    info!("Wrote artifacts to {}", dir.display());
    Ok(WrittenArtifacts { database, json, homepage })
}

pub fn connect(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS run (
            id             INTEGER PRIMARY KEY CHECK (id = 1),
            store_slug     TEXT NOT NULL,
            root_url       TEXT NOT NULL,
            fetched_at     TEXT NOT NULL,
            outcome        TEXT NOT NULL,
            total_products INTEGER NOT NULL,
            statistics     TEXT NOT NULL,
            created_at     TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS endpoints (
            endpoint  TEXT PRIMARY KEY,
            status    TEXT NOT NULL,
            url       TEXT NOT NULL,
            requests  INTEGER,
            documents INTEGER NOT NULL,
            records   INTEGER NOT NULL,
            detail    TEXT,
            notes     TEXT
        );

        CREATE TABLE IF NOT EXISTS products (
            id               INTEGER PRIMARY KEY,
            handle           TEXT NOT NULL,
            title            TEXT NOT NULL,
            product_type     TEXT NOT NULL,
            vendor           TEXT NOT NULL,
            tags             TEXT NOT NULL,
            price            TEXT,
            price_minor      INTEGER,
            price_scale      INTEGER,
            price_coerced    BOOLEAN NOT NULL DEFAULT 0,
            description_text TEXT NOT NULL,
            cluster_id       INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_products_type ON products(product_type);

        CREATE TABLE IF NOT EXISTS variants (
            id            INTEGER PRIMARY KEY,
            product_id    INTEGER NOT NULL REFERENCES products(id),
            position      INTEGER NOT NULL,
            variant_id    INTEGER,
            price         TEXT NOT NULL,
            price_minor   INTEGER NOT NULL,
            price_scale   INTEGER NOT NULL,
            price_coerced BOOLEAN NOT NULL,
            sku           TEXT,
            available     BOOLEAN
        );
        CREATE INDEX IF NOT EXISTS idx_variants_product ON variants(product_id);

        CREATE TABLE IF NOT EXISTS collections (
            id                     INTEGER PRIMARY KEY,
            handle                 TEXT NOT NULL,
            title                  TEXT NOT NULL,
            template_suffix        TEXT NOT NULL,
            product_count          INTEGER,
            product_count_explicit BOOLEAN NOT NULL,
            resolved_product_count INTEGER
        );

        CREATE TABLE IF NOT EXISTS collection_products (
            collection_id INTEGER NOT NULL REFERENCES collections(id),
            product_id    INTEGER NOT NULL,
            resolved      BOOLEAN NOT NULL,
            PRIMARY KEY (collection_id, product_id)
        );

        CREATE TABLE IF NOT EXISTS sitemap_entries (
            id            INTEGER PRIMARY KEY,
            url           TEXT NOT NULL,
            category      TEXT NOT NULL,
            last_modified TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_sitemap_category ON sitemap_entries(category);

        CREATE TABLE IF NOT EXISTS tech_signals (
            name             TEXT PRIMARY KEY,
            category         TEXT NOT NULL,
            evidence_snippet TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS clusters (
            cluster_id        INTEGER PRIMARY KEY,
            size              INTEGER NOT NULL,
            avg_price         REAL,
            centroid_terms    TEXT NOT NULL,
            top_product_types TEXT NOT NULL,
            example_titles    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cluster_members (
            cluster_id INTEGER NOT NULL REFERENCES clusters(cluster_id),
            product_id INTEGER NOT NULL REFERENCES products(id),
            PRIMARY KEY (cluster_id, product_id)
        );

        CREATE TABLE IF NOT EXISTS anomalies (
            id        INTEGER PRIMARY KEY,
            entity    TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            kind      TEXT NOT NULL,
            detail    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_anomalies_kind ON anomalies(kind);
        ",
    )?;
    Ok(())
}

/// Store the whole profile in one transaction.
pub fn save_profile(conn: &Connection, profile: &Profile) -> Result<()> {
    let cluster_of: HashMap<u64, usize> = profile
        .clustering
        .clusters()
        .iter()
        .flat_map(|c| c.member_product_ids.iter().map(move |&pid| (pid, c.cluster_id)))
        .collect();

    let tx = conn.unchecked_transaction()?;
    {
        tx.execute(
            "INSERT INTO run (id, store_slug, root_url, fetched_at, outcome, total_products, statistics)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                profile.store.slug,
                profile.store.root_url,
                profile.fetched_at.to_rfc3339(),
                profile.outcome.as_str(),
                profile.statistics.total_products as i64,
                serde_json::to_string(&profile.statistics)?,
            ],
        )?;

        let mut e_stmt = tx.prepare(
            "INSERT INTO endpoints (endpoint, status, url, requests, documents, records, detail, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for e in &profile.endpoints {
            e_stmt.execute(rusqlite::params![
                e.endpoint.as_str(),
                e.status.as_str(),
                e.url,
                e.requests,
                e.documents as i64,
                e.records as i64,
                e.detail,
                serde_json::to_string(&e.notes)?,
            ])?;
        }

        let mut p_stmt = tx.prepare(
            "INSERT INTO products
             (id, handle, title, product_type, vendor, tags, price, price_minor, price_scale,
              price_coerced, description_text, cluster_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )?;
        let mut v_stmt = tx.prepare(
            "INSERT INTO variants
             (product_id, position, variant_id, price, price_minor, price_scale, price_coerced, sku,
              available)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        for p in &profile.products {
            let sample = p.price_sample();
            p_stmt.execute(rusqlite::params![
                p.id as i64,
                p.handle,
                p.title,
                p.product_type,
                p.vendor,
                serde_json::to_string(&p.tags)?,
                sample.map(|price| price.to_string()),
                sample.map(|price| price.minor_units() as i64),
                sample.map(|price| price.scale()),
                p.variants.first().is_some_and(|v| v.price_coerced),
                p.description_text,
                cluster_of.get(&p.id).map(|&c| c as i64),
            ])?;
            for (position, v) in p.variants.iter().enumerate() {
                v_stmt.execute(rusqlite::params![
                    p.id as i64,
                    position as i64,
                    v.id.map(|id| id as i64),
                    v.price.to_string(),
                    v.price.minor_units() as i64,
                    v.price.scale(),
                    v.price_coerced,
                    v.sku,
                    v.available,
                ])?;
            }
        }

        let mut c_stmt = tx.prepare(
            "INSERT INTO collections
             (id, handle, title, template_suffix, product_count, product_count_explicit,
              resolved_product_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        let mut cp_stmt = tx.prepare(
            "INSERT OR IGNORE INTO collection_products (collection_id, product_id, resolved)
             VALUES (?1, ?2, ?3)",
        )?;
        for c in &profile.collections {
            c_stmt.execute(rusqlite::params![
                c.id as i64,
                c.handle,
                c.title,
                c.template_suffix,
                c.product_count.map(|n| n as i64),
                c.product_count_explicit,
                c.resolved_product_count.map(|n| n as i64),
            ])?;
            for pid in &c.product_ids {
                cp_stmt.execute(rusqlite::params![
                    c.id as i64,
                    *pid as i64,
                    !c.unresolved_product_ids.contains(pid),
                ])?;
            }
        }

        let mut s_stmt = tx.prepare(
            "INSERT INTO sitemap_entries (url, category, last_modified) VALUES (?1, ?2, ?3)",
        )?;
        for s in &profile.sitemap_entries {
            s_stmt.execute(rusqlite::params![s.url, s.category.as_str(), s.last_modified])?;
        }

        let mut t_stmt = tx.prepare(
            "INSERT OR REPLACE INTO tech_signals (name, category, evidence_snippet) VALUES (?1, ?2, ?3)",
        )?;
        for t in &profile.tech_signals {
            t_stmt.execute(rusqlite::params![t.name, t.category.as_str(), t.evidence_snippet])?;
        }

        let mut k_stmt = tx.prepare(
            "INSERT INTO clusters
             (cluster_id, size, avg_price, centroid_terms, top_product_types, example_titles)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        let mut m_stmt = tx.prepare(
            "INSERT INTO cluster_members (cluster_id, product_id) VALUES (?1, ?2)",
        )?;
        for c in profile.clustering.clusters() {
            k_stmt.execute(rusqlite::params![
                c.cluster_id as i64,
                c.size as i64,
                c.avg_price,
                serde_json::to_string(&c.centroid_terms)?,
                serde_json::to_string(&c.top_product_types)?,
                serde_json::to_string(&c.example_titles)?,
            ])?;
            for pid in &c.member_product_ids {
                m_stmt.execute(rusqlite::params![c.cluster_id as i64, *pid as i64])?;
            }
        }

        let mut a_stmt = tx.prepare(
            "INSERT INTO anomalies (entity, entity_id, kind, detail) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for a in &profile.diagnostics {
            a_stmt.execute(rusqlite::params![
                a.entity.as_str(),
                a.entity_id,
                a.kind.as_str(),
                a.detail,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}
