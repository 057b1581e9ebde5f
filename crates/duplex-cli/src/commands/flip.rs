use duplex_core::Color;

use crate::context::Context;
use crate::render;

pub async fn run(ctx: &Context, target: Option<Color>, yes: bool) -> anyhow::Result<()> {
    let confirm = ctx.confirmer(yes);
    let report = match target {
        Some(target) => ctx.flipper.flip(target, confirm.as_ref()).await?,
        None => ctx.flipper.flip_to_inactive(confirm.as_ref()).await?,
    };
    print!("{}", render::action_stdout(&report.output));
    println!(
        "✓ Traffic switched {} → {} ({})",
        report.previous, report.target, report.action
    );
    Ok(())
}
