// LMSR demo and portfolio scenario runner
use amm_simulator::config::Config;
use amm_simulator::input::SimulationInput;
use amm_simulator::lmsr_core::Market;
use amm_simulator::sensitivity::compare_price_impact;
use anyhow::Result;
use serde_json::json;
use tracing::info;

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,amm_simulator=debug".into()),
        )
        .init();

    let config = Config::from_env();
    config.log_config();

    run_market_demo(&config)?;

    // Input file: first argument, then SIM_INPUT, then the built-in sample
    let input = match std::env::args().nth(1).or_else(|| std::env::var("SIM_INPUT").ok()) {
        Some(path) => {
            info!(%path, "loading simulation input");
            SimulationInput::load(path)?
        }
        None => SimulationInput::sample()?,
    };

    let output = input.run(&config)?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    if let Ok((worst, best)) = output.report.extremes() {
        println!("\n📉 Worst case: {} ({:+.2})", worst.scenario, worst.pnl);
        println!("📈 Best case:  {} ({:+.2})", best.scenario, best.pnl);
    }

    Ok(())
}

/// 3-outcome market: buy 50 of outcome 0, then compare the Jacobian estimate
/// for +10 more against the exact move.
fn run_market_demo(config: &Config) -> Result<()> {
    let mut market = Market::new(3, config.market.default_liquidity_b)?;
    let initial = market.prices()?;

    let bought = market.apply_trade(0, 50.0)?;
    let impact = compare_price_impact(market.q(), market.b(), 0, 10.0)?;

    let demo = json!({
        "outcomes": ["Zootopia", "Minecraft", "Wicked"],
        "initial_prices": initial,
        "bought_shares": 50.0,
        "spent": bought.dollars_spent,
        "new_prices": bought.new_prices,
        "impact_of_10_more": impact,
    });
    println!("{}", serde_json::to_string_pretty(&demo)?);
    Ok(())
}
