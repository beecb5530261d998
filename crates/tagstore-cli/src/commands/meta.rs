//! Meta command handlers

use anyhow::Result;

use tagstore_core::Library;

use crate::output::{Output, OutputFormat};

/// Print one value, or every key when `key` is `None`
pub fn get(library: &Library, key: Option<String>, output: &Output) -> Result<()> {
    match key {
        Some(key) => {
            let value = library.get_meta(&key)?;
            output.print_meta(&key, value.as_deref());
        }
        None => {
            let keys = library.meta_keys()?;
            if output.format == OutputFormat::Json {
                let mut entries = serde_json::Map::new();
                for key in keys {
                    let value = library.get_meta(&key)?;
                    entries.insert(key, serde_json::json!(value));
                }
                println!("{}", serde_json::Value::Object(entries));
            } else {
                for key in keys {
                    let value = library.get_meta(&key)?;
                    output.print_meta(&key, value.as_deref());
                }
            }
        }
    }
    Ok(())
}

pub fn set(library: &Library, key: String, value: String, output: &Output) -> Result<()> {
    library.set_meta(&key, Some(&value))?;
    output.success(&format!("Set {} = {}", key, value));
    Ok(())
}

pub fn unset(library: &Library, key: String, output: &Output) -> Result<()> {
    library.set_meta(&key, None)?;
    output.success(&format!("Unset {}", key));
    Ok(())
}
