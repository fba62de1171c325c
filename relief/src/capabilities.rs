//! WMS GetCapabilities documents (1.3.0 and 1.1.1).

use std::fmt::{self, Write};

use quick_xml::escape::escape;

use crate::crs::{project_bbox, Crs};
use crate::encode::OutputFormat;
use crate::error::{ReliefError, Result};
use crate::request::{InfoFormat, Layer, WmsVersion};
use crate::source::RasterSource;
use crate::window::BoundingBox;

/// Service metadata advertised alongside the raster.
#[derive(Debug, Clone, Copy)]
pub struct ServiceInfo<'a> {
    /// Protocol version of the document.
    pub version: WmsVersion,
    pub title: &'a str,
    /// Base URL of the WMS endpoint, without query string.
    pub online_resource: &'a str,
    pub crs: &'a [Crs],
    pub max_width: u32,
    pub max_height: u32,
}

/// MIME type of the capabilities document for `version`.
pub fn content_type(version: WmsVersion) -> &'static str {
    match version {
        WmsVersion::V1_3_0 => "text/xml",
        WmsVersion::V1_1_1 => "application/vnd.ogc.wms_xml",
    }
}

/// Render the capabilities document for `source`.
///
/// The geographic bounding box and the per-CRS bounding boxes are the raster
/// extent projected into each CRS; CRSes the extent cannot be projected into
/// are listed without a bounding box. A 1.1.1 document lists `SRS` elements
/// in x/y order and leaves out `CRS:84`, which 1.1.1 does not define.
///
/// # Errors
///
/// Returns [`ReliefError::Source`] if the raster extent cannot be expressed
/// in WGS 84. The request carries no CRS, so this is a server fault.
pub fn capabilities_xml(source: &RasterSource, info: &ServiceInfo<'_>) -> Result<String> {
    let geographic = project_bbox(&source.extent(), source.crs(), &Crs::wgs84()).map_err(|e| {
        ReliefError::open_failed(
            source.path(),
            format!("raster extent has no geographic bounds: {}", e),
        )
    })?;

    let mut xml = String::with_capacity(4096);
    write_document(&mut xml, source, info, &geographic).map_err(|e| ReliefError::Encode {
        message: format!("capabilities document: {}", e),
    })?;
    Ok(xml)
}

fn write_document(
    xml: &mut String,
    source: &RasterSource,
    info: &ServiceInfo<'_>,
    geographic: &BoundingBox,
) -> fmt::Result {
    let v130 = info.version == WmsVersion::V1_3_0;
    let href = escape(info.online_resource);
    let title = escape(info.title);
    let file = source
        .path()
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();

    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    if v130 {
        writeln!(
            xml,
            r#"<WMS_Capabilities version="1.3.0" xmlns="http://www.opengis.net/wms" xmlns:xlink="http://www.w3.org/1999/xlink">"#
        )?;
    } else {
        writeln!(
            xml,
            r#"<WMT_MS_Capabilities version="1.1.1" xmlns:xlink="http://www.w3.org/1999/xlink">"#
        )?;
    }

    write!(
        xml,
        r#"  <Service>
    <Name>{name}</Name>
    <Title>{title}</Title>
    <Abstract>Shaded relief rendered on demand from {file}</Abstract>
    <OnlineResource xlink:type="simple" xlink:href="{href}"/>
"#,
        name = if v130 { "WMS" } else { "OGC:WMS" },
        file = escape(&file),
    )?;
    if v130 {
        writeln!(xml, "    <MaxWidth>{}</MaxWidth>", info.max_width)?;
        writeln!(xml, "    <MaxHeight>{}</MaxHeight>", info.max_height)?;
    }
    xml.push_str("  </Service>\n  <Capability>\n    <Request>\n");

    let map_formats: Vec<&str> = OutputFormat::ALL.iter().map(|f| f.mime_type()).collect();
    let info_formats: Vec<&str> = InfoFormat::ALL.iter().map(|f| f.mime_type()).collect();
    let capabilities_format = content_type(info.version);
    write_operation(xml, "GetCapabilities", &[capabilities_format], &href)?;
    write_operation(xml, "GetMap", &map_formats, &href)?;
    write_operation(xml, "GetFeatureInfo", &info_formats, &href)?;

    write!(
        xml,
        r#"    </Request>
    <Exception>
      <Format>{}</Format>
    </Exception>
    <Layer>
      <Title>{title}</Title>
"#,
        if v130 { "XML" } else { "application/vnd.ogc.se_xml" }
    )?;

    let crs_element = if v130 { "CRS" } else { "SRS" };
    let offered: Vec<&Crs> = info
        .crs
        .iter()
        .filter(|crs| v130 || !crs.is_crs84())
        .collect();
    for crs in &offered {
        writeln!(xml, "      <{0}>{1}</{0}>", crs_element, crs)?;
    }

    if v130 {
        write!(
            xml,
            r#"      <EX_GeographicBoundingBox>
        <westBoundLongitude>{}</westBoundLongitude>
        <eastBoundLongitude>{}</eastBoundLongitude>
        <southBoundLatitude>{}</southBoundLatitude>
        <northBoundLatitude>{}</northBoundLatitude>
      </EX_GeographicBoundingBox>
"#,
            geographic.min_x, geographic.max_x, geographic.min_y, geographic.max_y
        )?;
    } else {
        writeln!(
            xml,
            r#"      <LatLonBoundingBox minx="{}" miny="{}" maxx="{}" maxy="{}"/>"#,
            geographic.min_x, geographic.min_y, geographic.max_x, geographic.max_y
        )?;
    }

    let extent = source.extent();
    for crs in offered {
        let Ok(bbox) = project_bbox(&extent, source.crs(), crs) else {
            continue;
        };
        write_bbox(xml, info.version, crs, &bbox)?;
    }

    for layer in Layer::ALL {
        write!(
            xml,
            r#"      <Layer queryable="1" opaque="0">
        <Name>{}</Name>
        <Title>{}</Title>
      </Layer>
"#,
            layer.name(),
            layer.title()
        )?;
    }

    xml.push_str("    </Layer>\n  </Capability>\n");
    writeln!(
        xml,
        "</{}>",
        if v130 { "WMS_Capabilities" } else { "WMT_MS_Capabilities" }
    )
}

fn write_operation(xml: &mut String, name: &str, formats: &[&str], href: &str) -> fmt::Result {
    writeln!(xml, "      <{}>", name)?;
    for format in formats {
        writeln!(xml, "        <Format>{}</Format>", format)?;
    }
    writeln!(
        xml,
        r#"        <DCPType><HTTP><Get><OnlineResource xlink:type="simple" xlink:href="{}?"/></Get></HTTP></DCPType>"#,
        href
    )?;
    writeln!(xml, "      </{}>", name)
}

/// `BoundingBox` element. 1.3.0 uses the CRS's axis order, 1.1.1 always x/y.
fn write_bbox(xml: &mut String, version: WmsVersion, crs: &Crs, bbox: &BoundingBox) -> fmt::Result {
    let lat_first = version == WmsVersion::V1_3_0 && crs.is_geographic() && !crs.is_crs84();
    let (min_a, min_b, max_a, max_b) = if lat_first {
        (bbox.min_y, bbox.min_x, bbox.max_y, bbox.max_x)
    } else {
        (bbox.min_x, bbox.min_y, bbox.max_x, bbox.max_y)
    };
    let attr = match version {
        WmsVersion::V1_3_0 => "CRS",
        WmsVersion::V1_1_1 => "SRS",
    };
    writeln!(
        xml,
        r#"      <BoundingBox {}="{}" minx="{}" miny="{}" maxx="{}" maxy="{}"/>"#,
        attr, crs, min_a, min_b, max_a, max_b
    )
}
