//! Textual geometry encodings that carry a bounding box.
//!
//! Used by the JSON-LD and RDF extractors, which see extents as strings:
//! WKT polygons/envelopes (DCAT `dcat:bbox`, GeoSPARQL `geo:asWKT`,
//! `locn:geometry`) and schema.org `box` values (`"south west north east"`).

use super::Corners;

/// Parse a WKT `POLYGON`, `MULTIPOLYGON`, `POINT` or CQL `ENVELOPE` into the
/// extent of its coordinates. A leading CRS IRI (`<http://...> POLYGON(...)`)
/// is skipped; coordinates are read as `longitude latitude`, ignoring any Z
/// or M ordinates.
pub fn parse_wkt(value: &str) -> Option<Corners> {
    let mut text = value.trim();
    if text.starts_with('<') {
        let end = text.find('>')?;
        text = text[end + 1..].trim_start();
    }
    let open = text.find('(')?;
    let keyword = text[..open].to_ascii_uppercase();
    // `POINT Z (...)`, `POLYGON ZM (...)`
    let keyword = keyword.split_whitespace().next().unwrap_or_default();
    let body = &text[open..];

    match keyword {
        "ENVELOPE" => {
            // ENVELOPE(minX, maxX, maxY, minY)
            let nums = numbers(body);
            if nums.len() != 4 {
                return None;
            }
            Some(Corners {
                west: nums[0],
                east: nums[1],
                north: nums[2],
                south: nums[3],
            })
        }
        "POLYGON" | "MULTIPOLYGON" | "POINT" | "MULTIPOINT" | "LINESTRING" => {
            let mut corners: Option<Corners> = None;
            for point in points(body) {
                let (lon, lat) = match point.as_slice() {
                    [lon, lat, ..] => (*lon, *lat),
                    _ => return None,
                };
                corners = Some(match corners {
                    None => Corners::point(lon, lat),
                    Some(c) => Corners {
                        west: c.west.min(lon),
                        east: c.east.max(lon),
                        south: c.south.min(lat),
                        north: c.north.max(lat),
                    },
                });
            }
            corners
        }
        _ => None,
    }
}

/// Parse a schema.org `GeoShape.box`: `"south west north east"`
/// (whitespace or comma separated).
pub fn parse_box(value: &str) -> Option<Corners> {
    let nums = numbers(value);
    if nums.len() != 4 {
        return None;
    }
    Some(Corners {
        south: nums[0],
        west: nums[1],
        north: nums[2],
        east: nums[3],
    })
}

/// Any supported textual geometry.
pub fn parse_geometry(value: &str) -> Option<Corners> {
    if value.contains('(') {
        parse_wkt(value)
    } else {
        parse_box(value)
    }
}

fn numbers(text: &str) -> Vec<f64> {
    text.split(|c: char| c.is_whitespace() || matches!(c, ',' | '(' | ')'))
        .filter(|t| !t.is_empty())
        .filter_map(|t| t.parse::<f64>().ok())
        .collect()
}

/// Coordinates of each comma- or parenthesis-delimited point.
fn points(text: &str) -> Vec<Vec<f64>> {
    text.split(|c: char| matches!(c, ',' | '(' | ')'))
        .filter(|p| !p.trim().is_empty())
        .map(|p| p.split_whitespace().filter_map(|t| t.parse::<f64>().ok()).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polygon_extent() {
        let c = parse_wkt("POLYGON((-8.6 49.9, 1.8 49.9, 1.8 60.9, -8.6 60.9, -8.6 49.9))").unwrap();
        assert_eq!(c, Corners { west: -8.6, east: 1.8, south: 49.9, north: 60.9 });
    }

    #[test]
    fn polygon_with_crs_prefix() {
        let c = parse_wkt(
            "<http://www.opengis.net/def/crs/OGC/1.3/CRS84> POLYGON((0 1, 2 1, 2 3, 0 3, 0 1))",
        )
        .unwrap();
        assert_eq!(c, Corners { west: 0.0, east: 2.0, south: 1.0, north: 3.0 });
    }

    #[test]
    fn three_dimensional_coordinates_use_lon_lat_only() {
        let c = parse_wkt("POLYGON Z((-8.6 49.9 10, 1.8 49.9 12, 1.8 60.9 0, -8.6 49.9 10))").unwrap();
        assert_eq!(c, Corners { west: -8.6, east: 1.8, south: 49.9, north: 60.9 });

        let c = parse_wkt("POINT ZM (2.5 51 100 7)").unwrap();
        assert_eq!(c, Corners::point(2.5, 51.0));

        assert!(parse_wkt("LINESTRING(1 2, 3)").is_none());
    }

    #[test]
    fn envelope_order() {
        let c = parse_wkt("ENVELOPE(-8.6, 1.8, 60.9, 49.9)").unwrap();
        assert_eq!(c, Corners { west: -8.6, east: 1.8, south: 49.9, north: 60.9 });
    }

    #[test]
    fn schema_box() {
        let c = parse_box("49.9 -8.6 60.9 1.8").unwrap();
        assert_eq!(c, Corners { west: -8.6, east: 1.8, south: 49.9, north: 60.9 });
        assert!(parse_box("1 2 3").is_none());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_geometry("somewhere in Wales").is_none());
        assert!(parse_wkt("CIRCLE(1 2 3)").is_none());
    }
}
