use anyhow::Result;
use celltree::probe::SphereProbe;
use celltree::settings;

fn main() -> Result<()> {
    env_logger::init();

    let settings = settings::load_config()?;
    println!("{}", settings);

    let probe = SphereProbe::new(&settings)?;
    let report = probe.run()?;
    println!("{}", report);

    report.check(settings.expected_hits)?;
    if let Some(expected) = settings.expected_hits {
        println!("Passed: a total of {} ray-sphere intersections detected.", expected);
    }
    Ok(())
}
