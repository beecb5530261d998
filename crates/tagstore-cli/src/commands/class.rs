//! Tag class command handlers

use anyhow::{Context, Result};

use tagstore_core::{Library, TagClass, TagFilter, ValueType};

use super::find_class;
use crate::output::Output;

/// Create a class (idempotent for an identical schema)
pub fn add(
    library: &Library,
    name: String,
    value_type: String,
    hidden: bool,
    output: &Output,
) -> Result<()> {
    let value_type: ValueType = value_type.parse()?;
    let mut class = TagClass::new(name, value_type)?;
    class.hidden = hidden;
    let class = library
        .create_tag_class(&class)
        .context("Failed to create tag class")?;
    output.success(&format!(
        "Tag class {} ({}) is {}",
        class.name(),
        class.value_type(),
        class.identity
    ));
    Ok(())
}

/// List classes with their tag counts
pub fn list(library: &Library, output: &Output) -> Result<()> {
    let mut rows = Vec::new();
    for class in library.tag_classes()? {
        let count = library.tag_count(&TagFilter::class(&class))?;
        rows.push((class, count));
    }
    output.print_classes(&rows);
    Ok(())
}

/// Remove a class; `cascade` also removes its tags
pub fn remove(library: &Library, name: String, cascade: bool, output: &Output) -> Result<()> {
    let mut class = find_class(library, &name)?;
    library
        .remove_tag_class(&mut class, cascade)
        .with_context(|| format!("Failed to remove tag class '{}'", name))?;
    output.success(&format!("Removed tag class {}", name));
    Ok(())
}

/// Rename a class, keeping its tags
pub fn rename(library: &Library, name: String, new_name: String, output: &Output) -> Result<()> {
    let mut class = find_class(library, &name)?;
    class.set_name(new_name.clone())?;
    library
        .flush_tag_class(&mut class)
        .with_context(|| format!("Failed to rename tag class '{}'", name))?;
    output.success(&format!("Renamed {} to {}", name, new_name));
    Ok(())
}

/// Show or hide a class
pub fn set_hidden(library: &Library, name: String, hidden: bool, output: &Output) -> Result<()> {
    let mut class = find_class(library, &name)?;
    class.hidden = hidden;
    library.flush_tag_class(&mut class)?;
    let state = if hidden { "hidden" } else { "visible" };
    output.success(&format!("Tag class {} is now {}", name, state));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
    use tagstore_core::TagValue;

    fn quiet() -> Output {
        Output::new(OutputFormat::Quiet)
    }

    #[test]
    fn test_add_rename_remove() {
        let library = Library::open_in_memory().unwrap();
        add(&library, "author".into(), "text".into(), false, &quiet()).unwrap();
        // Same schema again is fine
        add(&library, "Author".into(), "text".into(), false, &quiet()).unwrap();
        assert!(add(&library, "author".into(), "number".into(), false, &quiet()).is_err());

        rename(&library, "author".into(), "writer".into(), &quiet()).unwrap();
        let writer = library.tag_class("writer").unwrap().unwrap();
        library.create_tag(&writer, TagValue::text("Lewis")).unwrap();

        assert!(remove(&library, "writer".into(), false, &quiet()).is_err());
        remove(&library, "writer".into(), true, &quiet()).unwrap();
        assert!(library.tag_classes().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let library = Library::open_in_memory().unwrap();
        assert!(add(&library, "x".into(), "blob".into(), false, &quiet()).is_err());
    }

    #[test]
    fn test_set_hidden() {
        let library = Library::open_in_memory().unwrap();
        add(&library, "internal".into(), "none".into(), false, &quiet()).unwrap();
        set_hidden(&library, "internal".into(), true, &quiet()).unwrap();
        assert!(library.tag_class("internal").unwrap().unwrap().hidden);
    }
}
