//! OME-XML document stored in the first IFD's ImageDescription.

use std::fmt::Write as _;

use crate::image_pipeline::source::SourceMetadata;

const OME_NAMESPACE: &str = "http://www.openmicroscopy.org/Schemas/OME/2016-06";
const ORIGINAL_METADATA_NAMESPACE: &str = "openmicroscopy.org/OriginalMetadata";

/// Builds the OME-XML for `metadata`, one `Image` per series.
///
/// Planes are stored series-major, so series `n` starts at the IFD following
/// the last plane of series `n - 1`.
pub fn build_ome_xml(metadata: &SourceMetadata, creator: &str) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
    let _ = write!(
        xml,
        "<OME xmlns=\"{ns}\" xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" \
         xsi:schemaLocation=\"{ns} {ns}/ome.xsd\" Creator=\"{creator}\">",
        ns = OME_NAMESPACE,
        creator = escape(creator)
    );

    let mut first_ifd = 0usize;
    for (index, series) in metadata.series.iter().enumerate() {
        let dims = &series.dimensions;
        let _ = write!(xml, "<Image ID=\"Image:{index}\"");
        if let Some(name) = &series.name {
            let _ = write!(xml, " Name=\"{}\"", escape(name));
        }
        xml.push('>');
        let samples = dims.channel_count.max(1) as usize;
        let (order, size_z, size_c, size_t) = match &series.ome {
            Some(ome) => (ome.dimension_order.as_str(), ome.size_z, ome.size_c, ome.size_t),
            None => ("XYZCT", series.plane_count, samples, 1),
        };
        let _ = write!(
            xml,
            "<Pixels ID=\"Pixels:{index}\" DimensionOrder=\"{order}\" Type=\"{}\" \
             SizeX=\"{}\" SizeY=\"{}\" SizeZ=\"{size_z}\" SizeC=\"{size_c}\" SizeT=\"{size_t}\" \
             BigEndian=\"false\" Interleaved=\"{}\" SignificantBits=\"{}\"",
            dims.pixel_type.ome_name(),
            dims.width,
            dims.height,
            metadata.interleaved,
            dims.pixel_type.bits_per_sample()
        );
        if let Some(ome) = &series.ome {
            for (name, value) in &ome.physical {
                let _ = write!(xml, " {name}=\"{}\"", escape(value));
            }
        }
        xml.push('>');

        let channel_names = series.ome.as_ref().map(|ome| ome.channel_names.as_slice());
        for channel in 0..(size_c / samples).max(1) {
            let _ = write!(xml, "<Channel ID=\"Channel:{index}:{channel}\"");
            if let Some(Some(name)) = channel_names.and_then(|names| names.get(channel)) {
                let _ = write!(xml, " Name=\"{}\"", escape(name));
            }
            let _ = write!(xml, " SamplesPerPixel=\"{samples}\"><LightPath/></Channel>");
        }
        let _ = write!(
            xml,
            "<TiffData IFD=\"{first_ifd}\" PlaneCount=\"{}\"/>",
            series.plane_count
        );
        xml.push_str("</Pixels></Image>");
        first_ifd += series.plane_count;
    }

    if !metadata.original.is_empty() {
        let _ = write!(
            xml,
            "<StructuredAnnotations><XMLAnnotation ID=\"Annotation:0\" Namespace=\"{ORIGINAL_METADATA_NAMESPACE}\"><Value>"
        );
        for (key, value) in &metadata.original {
            let _ = write!(
                xml,
                "<OriginalMetadata><Key>{}</Key><Value>{}</Value></OriginalMetadata>",
                escape(key),
                escape(value)
            );
        }
        xml.push_str("</Value></XMLAnnotation></StructuredAnnotations>");
    }

    xml.push_str("</OME>");
    xml
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c if (c as u32) < 0x20 && !matches!(c, '\t' | '\n' | '\r') => {}
            c => escaped.push(c),
        }
    }
    escaped
}
