use anyhow::Result;

use super::CommandContext;
use crate::bootstrap::Runtime;

pub async fn reconcile(runtime: &Runtime, ctx: &CommandContext, limit: usize) -> Result<()> {
    let report = runtime.reconciler.reconcile_up_to(limit).await?;

    ctx.output(&report, |report| {
        println!("🔁 RECONCILIATION");
        println!("   replayed: {}", report.replayed.len());
        println!("   failed:   {}", report.failed.len());
        for (id, reason) in &report.failed {
            println!("      {id}: {reason}");
        }
        if !report.deferred.is_empty() {
            println!(
                "   deferred: {} (no job queue configured)",
                report.deferred.len()
            );
        }
        if report.exhausted > 0 {
            println!(
                "   exhausted: {} (needs manual review)",
                report.exhausted
            );
        }
    })
}
