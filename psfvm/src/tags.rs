//! Persistence of debug annotations.
//!
//! Annotations are stored per package in `<dir>/<package>.tags.xml`, in a document rooted at a
//! `tags` element with two sections, `functions` and `comments`:
//!
//! ```xml
//! <tags>
//!   <functions>
//!     <tag address="00001000" value="main"/>
//!   </functions>
//!   <comments/>
//! </tags>
//! ```

use easyerr::{Error, ResultExt};
use log::debug;
use quick_xml::{
    Reader, Writer,
    events::{BytesDecl, BytesEnd, BytesStart, Event},
};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

const SECTION_TAGS: &str = "tags";
const SECTION_FUNCTIONS: &str = "functions";
const SECTION_COMMENTS: &str = "comments";
const TAG: &str = "tag";

/// Annotations keyed by address.
pub type TagTable = BTreeMap<u32, String>;

/// The debug annotations of a package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugTags {
    /// Function names.
    pub functions: TagTable,
    /// Free-form comments.
    pub comments: TagTable,
}

impl DebugTags {
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty() && self.comments.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum TagsError {
    #[error("no debug tags stored for package {package}")]
    NotFound { package: String },
    #[error("malformed debug tags document: {reason}")]
    Malformed { reason: String },
    #[error("couldn't access debug tags document")]
    Io { source: std::io::Error },
}

impl TagsError {
    fn malformed(reason: impl std::fmt::Display) -> Self {
        Self::Malformed {
            reason: reason.to_string(),
        }
    }
}

/// Returns the path of the document of `package` inside `dir`.
pub fn package_path(dir: &Path, package: &str) -> PathBuf {
    dir.join(format!("{package}.tags.xml"))
}

/// Loads the annotations of `package` from `dir`.
pub fn load(dir: &Path, package: &str) -> Result<DebugTags, TagsError> {
    let path = package_path(dir, package);
    let data = match std::fs::read(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(TagsError::NotFound {
                package: package.to_owned(),
            });
        }
        Err(e) => return Err(e).context(TagsCtx::Io),
    };

    let text = String::from_utf8(data).map_err(TagsError::malformed)?;
    let tags = decode(&text)?;
    debug!(
        target: "psfvm::tags",
        "loaded {} functions and {} comments from {}",
        tags.functions.len(),
        tags.comments.len(),
        path.display()
    );

    Ok(tags)
}

/// Saves the annotations of `package` into `dir`, creating it if needed.
pub fn save(dir: &Path, package: &str, tags: &DebugTags) -> Result<(), TagsError> {
    std::fs::create_dir_all(dir).context(TagsCtx::Io)?;

    let path = package_path(dir, package);
    std::fs::write(&path, encode(tags)?).context(TagsCtx::Io)?;
    debug!(target: "psfvm::tags", "saved debug tags to {}", path.display());

    Ok(())
}

fn encode(tags: &DebugTags) -> Result<Vec<u8>, TagsError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    let mut write = |event: Event<'_>| writer.write_event(event).map_err(TagsError::malformed);

    write(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    write(Event::Start(BytesStart::new(SECTION_TAGS)))?;
    for (name, table) in [
        (SECTION_FUNCTIONS, &tags.functions),
        (SECTION_COMMENTS, &tags.comments),
    ] {
        write(Event::Start(BytesStart::new(name)))?;
        for (address, value) in table {
            let address = format!("{address:08X}");
            let mut tag = BytesStart::new(TAG);
            tag.push_attribute(("address", address.as_str()));
            tag.push_attribute(("value", value.as_str()));
            write(Event::Empty(tag))?;
        }
        write(Event::End(BytesEnd::new(name)))?;
    }
    write(Event::End(BytesEnd::new(SECTION_TAGS)))?;

    Ok(writer.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Functions,
    Comments,
}

fn decode(text: &str) -> Result<DebugTags, TagsError> {
    let mut reader = Reader::from_str(text);
    let mut tags = DebugTags::default();
    let mut found_root = false;
    let mut in_root = false;
    let mut section = None;

    loop {
        match reader.read_event().map_err(TagsError::malformed)? {
            Event::Start(element) => match element.name().as_ref() {
                b"tags" if !in_root => {
                    found_root = true;
                    in_root = true;
                }
                b"functions" if in_root => section = Some(Section::Functions),
                b"comments" if in_root => section = Some(Section::Comments),
                b"tag" => insert_tag(&mut tags, section, &element)?,
                _ => (),
            },
            Event::Empty(element) => match element.name().as_ref() {
                b"tags" => found_root = true,
                b"tag" => insert_tag(&mut tags, section, &element)?,
                _ => (),
            },
            Event::End(element) => match element.name().as_ref() {
                b"tags" => in_root = false,
                b"functions" | b"comments" => section = None,
                _ => (),
            },
            Event::Eof => break,
            _ => (),
        }
    }

    if !found_root {
        return Err(TagsError::malformed("missing tags section"));
    }

    if in_root {
        return Err(TagsError::malformed("unterminated tags section"));
    }

    Ok(tags)
}

/// Adds a `tag` element to the table of the section it appears in. Tags outside a section are
/// ignored.
fn insert_tag(
    tags: &mut DebugTags,
    section: Option<Section>,
    element: &BytesStart<'_>,
) -> Result<(), TagsError> {
    let table = match section {
        Some(Section::Functions) => &mut tags.functions,
        Some(Section::Comments) => &mut tags.comments,
        None => return Ok(()),
    };

    let (address, value) = parse_tag(element)?;
    table.insert(address, value);
    Ok(())
}

fn parse_tag(element: &BytesStart<'_>) -> Result<(u32, String), TagsError> {
    let mut address = None;
    let mut value = None;

    for attribute in element.attributes() {
        let attribute = attribute.map_err(TagsError::malformed)?;
        let text = attribute
            .unescape_value()
            .map_err(TagsError::malformed)?;

        match attribute.key.as_ref() {
            b"address" => {
                address =
                    Some(u32::from_str_radix(text.trim(), 16).map_err(TagsError::malformed)?);
            }
            b"value" => value = Some(text.into_owned()),
            _ => (),
        }
    }

    let address = address.ok_or_else(|| TagsError::malformed("tag without address"))?;
    Ok((address, value.unwrap_or_default()))
}
