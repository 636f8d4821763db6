// check.rs — Validate a change script without running it.

use std::path::Path;

use changeset_cli::{Script, Step};

pub fn execute(script_path: &Path) -> anyhow::Result<()> {
    let script = Script::load(script_path)?;

    let added: usize = script
        .steps
        .iter()
        .map(|step| match step {
            Step::Add { elements } => elements.len(),
            _ => 0,
        })
        .sum();

    println!(
        "{}: \"{}\": {} step(s), {} element(s) staged",
        script_path.display(),
        script.title,
        script.steps.len(),
        added
    );
    for (number, step) in script.steps.iter().enumerate() {
        println!("  {:>3}. {}", number, step.name());
    }
    Ok(())
}
