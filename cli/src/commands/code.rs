use anyhow::{bail, Result};
use meshdex::{mesh_code, NATIONAL_BBOX};

pub fn run(_cli: &crate::cli::Cli, args: &crate::cli::CodeArgs) -> Result<()> {
    let [lon_min, lat_min, lon_max, lat_max] = NATIONAL_BBOX;
    let inside = args.lon >= lon_min
        && args.lon < lon_max
        && args.lat >= lat_min
        && args.lat < lat_max;
    if !inside {
        bail!("coordinate ({}, {}) is outside the national extent", args.lat, args.lon);
    }

    println!("{}", mesh_code(args.lat, args.lon));

    Ok(())
}
