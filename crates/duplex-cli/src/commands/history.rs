use duplex_state::DeployHistory;

use crate::context::Context;

pub fn run(ctx: &Context, limit: usize) -> anyhow::Result<()> {
    let records = ctx.history()?.recent(limit)?;
    if records.is_empty() {
        println!("No deployments recorded.");
        return Ok(());
    }
    for (i, record) in records.iter().enumerate() {
        let marker = match i {
            0 => " (current)",
            1 => " (previous)",
            _ => "",
        };
        println!(
            "{}  {:<24} {:<12} {}{marker}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.tag,
            record.service,
            record.deployed_by
        );
    }
    Ok(())
}
