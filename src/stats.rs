//! Storage overview for the CLI.
//!
//! `mirage cache stats`, `mirage cache history` and `mirage index status`
//! print from here. Everything goes to stdout.

use std::path::Path;
use std::time::SystemTime;

use anyhow::Result;

use crate::app::App;

/// Row counts per tier, file sizes, and the cached README names.
pub async fn run_cache_stats(app: &App) -> Result<()> {
    let stats = app.caches.stats().await?;
    let storage = &app.config.storage;
    let cache_db = storage.cache_db_path();

    println!("pkgmirage: Cache Stats");
    println!("======================");
    println!();
    println!("  Database:    {}", cache_db.display());
    println!("  Size:        {}", format_bytes(file_size(&cache_db)));
    println!("  Bundles:     {}", storage.packages_dir().display());
    println!();
    println!("  Searches:    {}", stats.search);
    println!("  READMEs:     {}", stats.readme);
    println!("  Packages:    {}", stats.package);

    let documents = app.caches.documents.list_names().await?;
    if !documents.is_empty() {
        println!();
        println!("  {:<40} {}", "README", "LATEST");
        println!("  {}", "-".repeat(60));
        for doc in &documents {
            println!(
                "  {:<40} {}",
                doc.package_name,
                format_ts_relative(doc.latest.timestamp())
            );
        }
    }

    println!();
    Ok(())
}

pub async fn run_history(app: &App) -> Result<()> {
    let history = app.caches.queries.history().await?;
    if history.is_empty() {
        println!("No searches cached.");
        return Ok(());
    }

    println!("  {:<48} {:>6}   {}", "QUERY", "COUNT", "WHEN");
    println!("  {}", "-".repeat(72));
    for entry in &history {
        println!(
            "  {:<48} {:>6}   {}",
            entry.query,
            entry.count,
            format_ts_relative(entry.created_at.timestamp())
        );
    }
    Ok(())
}

/// Snapshot location, size, row count and freshness.
pub async fn run_index_status(app: &App) -> Result<()> {
    let index = &app.index;
    let status = index.status().await?;
    let rows = index.row_count().await.unwrap_or(0);
    let refreshed = std::fs::metadata(index.path())
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| format_ts_relative(d.as_secs() as i64));

    println!("pkgmirage: Existence Index");
    println!("==========================");
    println!();
    println!("  Snapshot:    {}", index.path().display());
    println!("  Source:      {}", index.source_label());
    println!("  Size:        {}", format_bytes(file_size(index.path())));
    println!("  Names:       {}", rows);
    println!("  Status:      {}", status.label());
    if status.has_data() {
        if let Some(when) = refreshed {
            println!("  Refreshed:   {}", when);
        }
    }
    println!(
        "  Stale after: {} hours",
        app.config.index.staleness_hours
    );
    println!();
    Ok(())
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_scale() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn relative_times() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 120), "2 mins ago");
        assert_eq!(format_ts_relative(now - 3600), "1 hour ago");
        assert_eq!(format_ts_relative(now - 3 * 86400), "3 days ago");
    }
}
