//! Reads the parts of an OME-XML ImageDescription that describe plane layout.
//!
//! Only the `Image`, `Pixels`, `Channel` and first `TiffData` elements are
//! looked at; everything else in the document is ignored.

use crate::image_pipeline::source::types::{DIMENSION_ORDERS, OmeDimensions};

const PHYSICAL_ATTRIBUTES: [&str; 8] = [
    "PhysicalSizeX",
    "PhysicalSizeXUnit",
    "PhysicalSizeY",
    "PhysicalSizeYUnit",
    "PhysicalSizeZ",
    "PhysicalSizeZUnit",
    "TimeIncrement",
    "TimeIncrementUnit",
];

/// One `Image` element of an OME-XML document.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OmeImage {
    pub name: Option<String>,
    pub dimensions: OmeDimensions,
    /// `IFD` of the first `TiffData`, when given.
    pub first_ifd: Option<usize>,
}

/// Parses every `Image` with a usable `Pixels` element, in document order.
///
/// Returns an empty list when the text is not OME-XML or any image is malformed.
pub(crate) fn parse_ome_images(xml: &str) -> Vec<OmeImage> {
    if !xml.contains("<OME") {
        return Vec::new();
    }

    let mut images = Vec::new();
    let mut rest = xml;
    while let Some((attributes, body, after)) = next_element(rest, "Image") {
        rest = after;
        match parse_image(&attributes, body) {
            Some(image) => images.push(image),
            None => return Vec::new(),
        }
    }
    images
}

fn parse_image(attributes: &[(String, String)], body: &str) -> Option<OmeImage> {
    let (pixels, pixels_body, _) = next_element(body, "Pixels")?;
    let size = |name: &str| -> Option<usize> {
        attribute(&pixels, name)?.parse::<usize>().ok().filter(|&n| n > 0)
    };

    let dimension_order = attribute(&pixels, "DimensionOrder")?;
    if !DIMENSION_ORDERS.contains(&dimension_order) {
        return None;
    }

    let mut channel_names = Vec::new();
    let mut rest = pixels_body;
    while let Some((channel, _, after)) = next_element(rest, "Channel") {
        channel_names.push(attribute(&channel, "Name").map(str::to_string));
        rest = after;
    }

    let physical = PHYSICAL_ATTRIBUTES
        .iter()
        .filter_map(|&name| attribute(&pixels, name).map(|v| (name.to_string(), v.to_string())))
        .collect();

    let first_ifd = next_element(pixels_body, "TiffData")
        .and_then(|(tiff_data, _, _)| attribute(&tiff_data, "IFD")?.parse::<usize>().ok());

    Some(OmeImage {
        name: attribute(attributes, "Name").map(str::to_string),
        dimensions: OmeDimensions {
            dimension_order: dimension_order.to_string(),
            size_z: size("SizeZ")?,
            size_c: size("SizeC")?,
            size_t: size("SizeT")?,
            channel_names,
            physical,
        },
        first_ifd,
    })
}

type Element<'a> = (Vec<(String, String)>, &'a str, &'a str);

/// Finds the next `<name ...>` element (with or without a namespace prefix).
///
/// Returns its attributes, its body (empty when self-closing) and the text after it.
fn next_element<'a>(text: &'a str, name: &str) -> Option<Element<'a>> {
    let mut search = 0;
    loop {
        let start = search + text[search..].find('<')?;
        let tag_start = start + 1;
        let tag_len = text[tag_start..]
            .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
            .unwrap_or(text.len() - tag_start);
        let tag = &text[tag_start..tag_start + tag_len];
        let local = tag.rsplit(':').next().unwrap_or(tag);
        search = tag_start;
        if local != name {
            continue;
        }

        let open_end = tag_start + text[tag_start..].find('>')?;
        let self_closing = text[..open_end].ends_with('/');
        let attr_end = if self_closing { open_end - 1 } else { open_end };
        let attributes = parse_attributes(&text[tag_start + tag_len..attr_end]);
        if self_closing {
            return Some((attributes, "", &text[open_end + 1..]));
        }

        let close = format!("</{tag}>");
        let body_start = open_end + 1;
        let body_len = text[body_start..].find(&close)?;
        let after = body_start + body_len + close.len();
        return Some((attributes, &text[body_start..body_start + body_len], &text[after..]));
    }
}

fn parse_attributes(text: &str) -> Vec<(String, String)> {
    let mut attributes = Vec::new();
    let mut rest = text;
    while let Some(eq) = rest.find('=') {
        let name = rest[..eq].trim();
        let value_part = rest[eq + 1..].trim_start();
        let Some(quote) = value_part.chars().next().filter(|c| *c == '"' || *c == '\'') else {
            break;
        };
        let Some(end) = value_part[1..].find(quote) else {
            break;
        };
        attributes.push((name.to_string(), unescape(&value_part[1..1 + end])));
        rest = &value_part[end + 2..];
    }
    attributes
}

fn attribute<'a>(attributes: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

fn unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
