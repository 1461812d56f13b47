use anyhow::Result;

use crate::config::DriverArgs;
use crate::drivers::query;
use crate::drivers::query::QueryInputs;
use crate::drivers::DriverRegistry;

/// Prints the answer of a driver query on stdout.
pub fn run_driver(args: DriverArgs) -> Result<()> {
    utils::logging::init();

    let answer = answer_query(&DriverRegistry::with_builtin(), &args)?;
    println!("{answer}");
    Ok(())
}

fn answer_query(drivers: &DriverRegistry, args: &DriverArgs) -> Result<String> {
    let driver = drivers
        .get(&args.provisioner)
        .map_err(|e| anyhow::anyhow!("{e:?}"))?;

    query::answer(driver.as_ref(), args.query, &QueryInputs::from(args))
        .map_err(|e| anyhow::anyhow!("Failed to answer {:?}: {e:?}", args.query))
}
