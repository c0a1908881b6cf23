//! Activity record encoding
//!
//! This module renders a finalized, partitioned [`AcquisitionActivity`] as an
//! `acquisitionActivity` XML fragment for embedding in a session-level
//! record. The fragment is deterministic: setup and per-file parameters are
//! sorted case-insensitively, datasets follow file-insertion order, and all
//! text is escaped so the output survives a standard XML parse. It carries no
//! header or namespace declarations; the surrounding document assembler owns
//! those.

use crate::activity::{AcquisitionActivity, DATASET_TYPE_KEY, WARNINGS_KEY};
use crate::error::CatalogError;
use crate::extract::MetadataMap;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Role attribute attached to every dataset block
pub const DATASET_ROLE: &str = "Experimental";

/// Suffix appended to preview artifact locations
pub const PREVIEW_SUFFIX: &str = ".thumb.png";

/// Encoder for rendering activities as XML record fragments.
///
/// `root_path` is the configured prefix of the instrument data share; it is
/// stripped from absolute file paths before percent-encoding them into
/// URL-safe dataset locations.
pub struct XmlEncoder {
    root_path: PathBuf,
}

impl XmlEncoder {
    /// Create an encoder that resolves locations against `root_path`
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
        }
    }

    /// Render one activity as an XML fragment.
    ///
    /// `seqno` is the activity's position in the session's sequence of
    /// activities; `sample_id` is reproduced verbatim (escaped, unchecked).
    /// Both partitioning passes must have run on the activity, otherwise
    /// [`CatalogError::SetupParamsNotComputed`] or
    /// [`CatalogError::UniqueMetaNotComputed`] is returned.
    pub fn encode(
        &self,
        activity: &AcquisitionActivity,
        seqno: usize,
        sample_id: &str,
    ) -> Result<String, CatalogError> {
        let setup = activity
            .setup_params
            .as_ref()
            .ok_or(CatalogError::SetupParamsNotComputed)?;
        let unique_meta = activity
            .unique_meta
            .as_ref()
            .ok_or(CatalogError::UniqueMetaNotComputed)?;

        let mut out = String::new();
        out.push_str(&format!("<acquisitionActivity seqno=\"{seqno}\">\n"));
        out.push_str(&format!(
            "  <startTime>{}</startTime>\n",
            escape_text(&activity.start.to_rfc3339())
        ));
        out.push_str(&format!(
            "  <sampleID>{}</sampleID>\n",
            escape_text(sample_id)
        ));

        out.push_str("  <setup>\n");
        for (key, value) in sorted_by_key(setup) {
            // a setup parameter is shared, so the first file's flag stands
            // for all of them
            let warning = if activity.key_flagged(0, key) {
                " warning=\"true\""
            } else {
                ""
            };
            out.push_str(&format!(
                "    <param name=\"{}\"{}>{}</param>\n",
                escape_attr(key),
                warning,
                escape_text(&value_text(value))
            ));
        }
        out.push_str("  </setup>\n");

        for (i, file) in activity.files.iter().enumerate() {
            let dataset_type = activity.meta[i]
                .get(DATASET_TYPE_KEY)
                .map(value_text)
                .unwrap_or_default();
            out.push_str(&format!(
                "  <dataset type=\"{}\" role=\"{DATASET_ROLE}\">\n",
                escape_attr(&dataset_type)
            ));

            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            out.push_str(&format!("    <name>{}</name>\n", escape_text(&name)));
            out.push_str(&format!(
                "    <location>{}</location>\n",
                self.relative_location(file)
            ));
            out.push_str(&format!(
                "    <preview>{}{PREVIEW_SUFFIX}</preview>\n",
                self.relative_location(&activity.previews[i])
            ));

            for (key, value) in sorted_by_key(&unique_meta[i]) {
                if key.as_str() == DATASET_TYPE_KEY || key.as_str() == WARNINGS_KEY {
                    continue;
                }
                let warning = if activity.key_flagged(i, key) {
                    " warning=\"true\""
                } else {
                    ""
                };
                out.push_str(&format!(
                    "    <meta name=\"{}\"{}>{}</meta>\n",
                    escape_attr(key),
                    warning,
                    escape_text(&value_text(value))
                ));
            }
            out.push_str("  </dataset>\n");
        }
        out.push_str("</acquisitionActivity>\n");
        Ok(out)
    }

    /// Strip the configured root prefix and percent-encode each path segment
    fn relative_location(&self, path: &Path) -> String {
        let location = match path.strip_prefix(&self.root_path) {
            Ok(rel) => format!("/{}", rel.display()),
            Err(_) => path.display().to_string(),
        };
        location
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Map entries ordered by case-insensitive key name
fn sorted_by_key(map: &MetadataMap) -> Vec<(&String, &Value)> {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by_key(|(key, _)| key.to_lowercase());
    entries
}

/// Render a metadata value as element text (strings bare, scalars via JSON)
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(text: &str) -> String {
    escape_text(text).replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn make_meta(pairs: &[(&str, &str)]) -> MetadataMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }

    fn make_partitioned_activity() -> AcquisitionActivity {
        let files = vec![
            PathBuf::from("/mnt/instr/session 1/img_001.dm3"),
            PathBuf::from("/mnt/instr/session 1/img_002.dm3"),
        ];
        AcquisitionActivity {
            start: Utc.with_ymd_and_hms(2021, 8, 2, 12, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2021, 8, 2, 13, 0, 0).unwrap(),
            mode: "IMAGING".to_string(),
            meta: vec![
                make_meta(&[
                    ("Mode", "TEM"),
                    ("Exposure", "1"),
                    (DATASET_TYPE_KEY, "Image"),
                ]),
                make_meta(&[
                    ("Mode", "TEM"),
                    ("Exposure", "2"),
                    (DATASET_TYPE_KEY, "Image"),
                ]),
            ],
            warnings: vec![vec!["Mode".to_string()], Vec::new()],
            previews: files.clone(),
            files,
            setup_params: Some(make_meta(&[("Mode", "TEM")])),
            unique_meta: Some(vec![
                make_meta(&[("Exposure", "1")]),
                make_meta(&[("Exposure", "2")]),
            ]),
        }
    }

    fn unescape(text: &str) -> String {
        text.replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&amp;", "&")
    }

    #[test]
    fn encodes_a_partitioned_activity() {
        let encoder = XmlEncoder::new("/mnt/instr");
        let xml = encoder
            .encode(&make_partitioned_activity(), 0, "sample-42")
            .unwrap();

        assert!(xml.starts_with("<acquisitionActivity seqno=\"0\">"));
        assert!(xml.contains("<startTime>2021-08-02T12:00:00+00:00</startTime>"));
        assert!(xml.contains("<sampleID>sample-42</sampleID>"));
        assert!(xml.contains("<param name=\"Mode\" warning=\"true\">TEM</param>"));
        assert!(xml.contains("<dataset type=\"Image\" role=\"Experimental\">"));
        assert!(xml.contains("<name>img_001.dm3</name>"));
        assert!(xml.contains("<meta name=\"Exposure\">1</meta>"));
        assert!(xml.contains("<meta name=\"Exposure\">2</meta>"));
        assert!(xml.ends_with("</acquisitionActivity>\n"));

        // datasets follow file-insertion order
        let first = xml.find("img_001.dm3").unwrap();
        let second = xml.find("img_002.dm3").unwrap();
        assert!(first < second);
    }

    #[test]
    fn locations_are_root_stripped_and_percent_encoded() {
        let encoder = XmlEncoder::new("/mnt/instr");
        let xml = encoder
            .encode(&make_partitioned_activity(), 0, "sample-42")
            .unwrap();

        assert!(xml.contains("<location>/session%201/img_001.dm3</location>"));
        assert!(xml.contains("<preview>/session%201/img_001.dm3.thumb.png</preview>"));
    }

    #[test]
    fn paths_outside_the_root_are_emitted_in_full() {
        let mut activity = make_partitioned_activity();
        activity.files[0] = PathBuf::from("/elsewhere/img_001.dm3");
        activity.previews[0] = activity.files[0].clone();

        let encoder = XmlEncoder::new("/mnt/instr");
        let xml = encoder.encode(&activity, 0, "sample-42").unwrap();
        assert!(xml.contains("<location>/elsewhere/img_001.dm3</location>"));
    }

    #[test]
    fn structural_characters_are_escaped_round_trip() {
        let mut activity = make_partitioned_activity();
        let original = "5 < x & y";
        activity
            .unique_meta
            .as_mut()
            .unwrap()[0]
            .insert("Note".to_string(), Value::String(original.to_string()));

        let encoder = XmlEncoder::new("/mnt/instr");
        let xml = encoder.encode(&activity, 0, "sample-42").unwrap();

        let escaped = "5 &lt; x &amp; y";
        assert!(xml.contains(&format!("<meta name=\"Note\">{escaped}</meta>")));
        assert_eq!(unescape(escaped), original);
    }

    #[test]
    fn parameters_are_sorted_case_insensitively() {
        let mut activity = make_partitioned_activity();
        activity.setup_params = Some(make_meta(&[
            ("beta", "2"),
            ("Alpha", "1"),
            ("gamma", "3"),
        ]));

        let encoder = XmlEncoder::new("/mnt/instr");
        let xml = encoder.encode(&activity, 3, "sample-42").unwrap();

        let alpha = xml.find("name=\"Alpha\"").unwrap();
        let beta = xml.find("name=\"beta\"").unwrap();
        let gamma = xml.find("name=\"gamma\"").unwrap();
        assert!(alpha < beta && beta < gamma);
        assert!(xml.contains("seqno=\"3\""));
    }

    #[test]
    fn scalar_values_render_bare() {
        let mut activity = make_partitioned_activity();
        activity
            .unique_meta
            .as_mut()
            .unwrap()[0]
            .insert("Dwell".to_string(), Value::from(2.5));

        let encoder = XmlEncoder::new("/mnt/instr");
        let xml = encoder.encode(&activity, 0, "sample-42").unwrap();
        assert!(xml.contains("<meta name=\"Dwell\">2.5</meta>"));
    }

    #[test]
    fn encode_requires_a_computed_partition() {
        let mut activity = make_partitioned_activity();
        activity.unique_meta = None;
        let encoder = XmlEncoder::new("/mnt/instr");
        assert!(matches!(
            encoder.encode(&activity, 0, "sample-42"),
            Err(CatalogError::UniqueMetaNotComputed)
        ));

        activity.setup_params = None;
        assert!(matches!(
            encoder.encode(&activity, 0, "sample-42"),
            Err(CatalogError::SetupParamsNotComputed)
        ));
    }
}
