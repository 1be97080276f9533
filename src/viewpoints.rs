//! Named camera viewpoints from a `cameras.json` style file.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{SplatError, SplatResult};

/// A stored camera: camera-to-world rotation rows and position.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewPoint {
    pub name: String,
    pub rotation: [[f32; 3]; 3],
    pub position: [f32; 3],
}

#[derive(Deserialize)]
struct ViewPointEntry {
    img_name: String,
    rotation: [[f32; 3]; 3],
    position: [f32; 3],
}

/// Parse either a JSON array of viewpoints or an object mapping arbitrary
/// keys to viewpoints. Object entries are ordered by numeric key where keys
/// are numbers. Entries missing a field are skipped with a warning.
pub fn parse_viewpoints(json: &str) -> SplatResult<Vec<ViewPoint>> {
    let entries: Vec<(String, Value)> = match serde_json::from_str(json)? {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| match (a.parse::<u64>(), b.parse::<u64>()) {
                (Ok(a), Ok(b)) => a.cmp(&b),
                _ => a.cmp(b),
            });
            entries
        }
        _ => return Err(SplatError::format("viewpoints must be a JSON array or object")),
    };

    let total = entries.len();
    let mut view_points = Vec::with_capacity(total);
    for (key, value) in entries {
        match serde_json::from_value::<ViewPointEntry>(value) {
            Ok(entry) => view_points.push(ViewPoint {
                name: entry.img_name,
                rotation: entry.rotation,
                position: entry.position,
            }),
            Err(e) => log::warn!("Skipping viewpoint '{}': {}", key, e),
        }
    }

    if total > 0 && view_points.is_empty() {
        return Err(SplatError::format(format!("none of {} viewpoints could be read", total)));
    }
    Ok(view_points)
}

pub fn load_viewpoints(path: &Path) -> SplatResult<Vec<ViewPoint>> {
    let json = std::fs::read_to_string(path)?;
    let view_points = parse_viewpoints(&json)?;
    log::info!("Loaded {} viewpoints from {}", view_points.len(), path.display());
    Ok(view_points)
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDENTITY: &str = "[[1,0,0],[0,1,0],[0,0,1]]";

    #[test]
    fn test_array_form() {
        let json = format!(
            r#"[{{"id": 0, "img_name": "a", "width": 10, "rotation": {r}, "position": [1, 2, 3]}},
                {{"id": 1, "img_name": "b", "rotation": {r}, "position": [0, 0, 0], "fx": 1.0}}]"#,
            r = IDENTITY
        );
        let vps = parse_viewpoints(&json).unwrap();
        assert_eq!(vps.len(), 2);
        assert_eq!(vps[0].name, "a");
        assert_eq!(vps[0].position, [1.0, 2.0, 3.0]);
        assert_eq!(vps[1].rotation[2], [0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_object_form_orders_numeric_keys() {
        let json = format!(
            r#"{{"10": {{"img_name": "ten", "rotation": {r}, "position": [0,0,0]}},
                "2": {{"img_name": "two", "rotation": {r}, "position": [0,0,0]}}}}"#,
            r = IDENTITY
        );
        let names: Vec<String> = parse_viewpoints(&json).unwrap().into_iter().map(|v| v.name).collect();
        assert_eq!(names, vec!["two", "ten"]);
    }

    #[test]
    fn test_incomplete_entries_skipped() {
        let json = format!(
            r#"[{{"img_name": "ok", "rotation": {r}, "position": [0,0,0]}}, {{"img_name": "bad"}}]"#,
            r = IDENTITY
        );
        assert_eq!(parse_viewpoints(&json).unwrap().len(), 1);
    }

    #[test]
    fn test_malformed_is_format_error() {
        assert!(matches!(parse_viewpoints("{"), Err(SplatError::Format(_))));
        assert!(matches!(parse_viewpoints("42"), Err(SplatError::Format(_))));
        assert!(matches!(
            parse_viewpoints(r#"[{"img_name": "bad"}]"#),
            Err(SplatError::Format(_))
        ));
        assert!(parse_viewpoints("[]").unwrap().is_empty());
    }
}
