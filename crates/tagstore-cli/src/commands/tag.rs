//! Tag command handlers

use anyhow::{anyhow, Context, Result};

use tagstore_core::{Library, TagFilter};

use super::{find_class, parse_id, parse_value};
use crate::output::Output;

/// Create a tag, or find the existing one with the same value
pub fn add(library: &Library, class: String, value: String, output: &Output) -> Result<()> {
    let class = find_class(library, &class)?;
    let value = parse_value(library, &class, &value)?;
    let tag = library
        .create_tag(&class, value)
        .context("Failed to create tag")?;
    output.print_tag(&tag);
    Ok(())
}

/// List tags, narrowed by class, value pattern and usage
pub fn list(
    library: &Library,
    class: Option<String>,
    pattern: Option<String>,
    unused: bool,
    output: &Output,
) -> Result<()> {
    let mut filter = TagFilter::all();
    if let Some(class) = class {
        filter = filter.and(TagFilter::class_wildcard(&class));
    }
    if let Some(pattern) = pattern {
        filter = filter.and(TagFilter::text_wildcard(&pattern));
    }
    if unused {
        filter = filter.and(TagFilter::unused());
    }
    let tags = library.tags(&filter)?;
    output.print_tags(&tags);
    Ok(())
}

/// Remove a tag; `cascade` also removes its links
pub fn remove(library: &Library, id: String, cascade: bool, output: &Output) -> Result<()> {
    let identity = parse_id(library, &id)?;
    let mut tag = library
        .tag(&identity)?
        .ok_or_else(|| anyhow!("Tag not found: {}", id))?;
    library
        .remove_tag(&mut tag, cascade)
        .with_context(|| format!("Failed to remove tag {}", id))?;
    output.success(&format!("Removed tag {}", identity));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{Output, OutputFormat};
    use tagstore_core::{TagClass, TagValue, ValueType};

    #[test]
    fn test_add_deduplicates_and_remove() {
        let library = Library::open_in_memory().unwrap();
        let output = Output::new(OutputFormat::Quiet);
        library
            .create_tag_class(&TagClass::new("year", ValueType::Number).unwrap())
            .unwrap();

        add(&library, "year".into(), "1865".into(), &output).unwrap();
        add(&library, "year".into(), "1865".into(), &output).unwrap();
        assert_eq!(library.tag_count(&TagFilter::all()).unwrap(), 1);
        assert!(add(&library, "year".into(), "later".into(), &output).is_err());
        assert!(add(&library, "month".into(), "4".into(), &output).is_err());

        let tag = library.tags(&TagFilter::all()).unwrap().remove(0);
        assert_eq!(tag.value(), &TagValue::number(1865));
        remove(&library, tag.identity.id().to_string(), false, &output).unwrap();
        assert_eq!(library.tag_count(&TagFilter::all()).unwrap(), 0);
        assert!(remove(&library, "99".into(), false, &output).is_err());
    }
}
