use anyhow::Result;
use deferrals::DeferralConfig;

pub fn run(config: &DeferralConfig) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
