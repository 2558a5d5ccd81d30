//! Check command - load a script once and report its hooks.

use std::path::Path;

use hookfs_core::{ExecutionContext, KNOWN_HOOKS, ScriptSource};

/// Load `script` into a fresh context and print which hooks it defines.
pub fn execute(script: &Path, name: Option<&str>) -> anyhow::Result<()> {
    let mut source = ScriptSource::from_file(script)?;
    if let Some(name) = name {
        source = source.with_name(name);
    }

    let context = ExecutionContext::load(&source)?;

    let mut defined = Vec::new();
    for hook in KNOWN_HOOKS {
        if context.hook(hook)?.is_some() {
            defined.push(*hook);
        }
    }

    println!("{}: ok", source.name());
    if defined.is_empty() {
        println!("  no filesystem hooks defined; every operation will return ENOSYS");
    } else {
        println!("  hooks: {}", defined.join(", "));
    }

    Ok(())
}
