use crate::toa5::LoggerMetadata;
use std::fmt;
use thiserror::Error;

/// Minimum number of underscore-delimited segments in a routable filename
const MIN_SEGMENTS: usize = 4;

/// Filename does not follow `{Station}_{Table}_Raw_{YYYY}_{MM}_{DD}_{HHMM}.dat`
#[derive(Error, Debug)]
#[error("filename {filename:?} has {segments} underscore-delimited segments, expected at least 4")]
pub struct FilenameFormatError {
    pub filename: String,
    pub segments: usize,
}

/// Year/month partition taken from the filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubPath {
    pub year: String,
    pub month: String,
}

impl fmt::Display for SubPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.year, self.month)
    }
}

/// Canonical dataset name: station and table without the organizational prefix,
/// followed by the program signature.
///
/// `LTAR_FIELD1` + `LTAR_TABLE2` + `12345` gives `FIELD1TABLE2_V12345`.
pub fn dataset_name(meta: &LoggerMetadata, prefix: &str) -> String {
    let station = strip_prefix(&meta.station_name, prefix);
    let table = strip_prefix(&meta.table_name, prefix);

    format!("{}{}_V{}", station, table, meta.program_signature)
}

fn strip_prefix<'a>(value: &'a str, prefix: &str) -> &'a str {
    if prefix.is_empty() {
        return value;
    }
    value.strip_prefix(prefix).unwrap_or(value)
}

/// Year and month from the 4th and 3rd last segments of the filename.
///
/// Segments are passed through as found; `2023_13` yields month `13`. Only a
/// trailing extension is dropped, a dot followed by an underscore is kept.
pub fn sub_path(filename: &str) -> Result<SubPath, FilenameFormatError> {
    let stem = match filename.rsplit_once('.') {
        Some((stem, ext)) if !ext.contains('_') => stem,
        _ => filename,
    };

    let sections: Vec<&str> = stem.split('_').collect();
    let n = sections.len();
    if n < MIN_SEGMENTS {
        return Err(FilenameFormatError {
            filename: filename.to_string(),
            segments: n,
        });
    }

    Ok(SubPath {
        year: sections[n - 4].to_string(),
        month: sections[n - 3].to_string(),
    })
}

/// Destination of a routed file inside the raw zone.
///
/// Renders as `{project}/{dataset}/{year}/{month}/{filename}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationKey {
    pub project_id: String,
    pub dataset_name: String,
    pub sub_path: SubPath,
    pub filename: String,
}

impl DestinationKey {
    /// Derive the key for a file from its header metadata and name
    pub fn derive(
        project_id: &str,
        meta: &LoggerMetadata,
        filename: &str,
        prefix: &str,
    ) -> Result<Self, FilenameFormatError> {
        Ok(Self {
            project_id: project_id.to_string(),
            dataset_name: dataset_name(meta, prefix),
            sub_path: sub_path(filename)?,
            filename: filename.to_string(),
        })
    }
}

impl fmt::Display for DestinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.project_id, self.dataset_name, self.sub_path, self.filename
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toa5::tests::SAMPLE;
    use crate::toa5::Toa5Extractor;

    const FILENAME: &str = "FIELD1EC_TABLE2_Raw_2023_07_15_1200.dat";

    fn metadata(station: &str, table: &str) -> LoggerMetadata {
        let mut meta = Toa5Extractor::new(FILENAME, SAMPLE.as_bytes(), -8)
            .extract()
            .unwrap();
        meta.station_name = station.to_string();
        meta.table_name = table.to_string();
        meta
    }

    #[test]
    fn test_dataset_name_strips_prefix() {
        let meta = metadata("LTAR_FIELD1", "LTAR_TABLE2");
        assert_eq!(dataset_name(&meta, "LTAR_"), "FIELD1TABLE2_V12345");
    }

    #[test]
    fn test_dataset_name_without_prefix() {
        let meta = metadata("FIELD1", "TABLE2");
        assert_eq!(dataset_name(&meta, "LTAR_"), "FIELD1TABLE2_V12345");
        assert_eq!(dataset_name(&meta, ""), "FIELD1TABLE2_V12345");
    }

    #[test]
    fn test_dataset_name_only_strips_leading_prefix() {
        let meta = metadata("LTAR_FIELD_LTAR_1", "FLUX_LTAR_");
        assert_eq!(dataset_name(&meta, "LTAR_"), "FIELD_LTAR_1FLUX_LTAR__V12345");
    }

    #[test]
    fn test_sub_path() {
        assert_eq!(
            sub_path(FILENAME).unwrap(),
            SubPath {
                year: "2023".to_string(),
                month: "07".to_string(),
            }
        );
    }

    #[test]
    fn test_sub_path_minimum_segments() {
        let sub = sub_path("2023_07_15_1200.dat").unwrap();
        assert_eq!(sub.to_string(), "2023/07");

        let sub = sub_path("a_b_c_d").unwrap();
        assert_eq!(sub.year, "a");
        assert_eq!(sub.month, "b");
    }

    #[test]
    fn test_sub_path_passes_tokens_through() {
        let sub = sub_path("S_T_Raw_20x3_13_15_1200.dat").unwrap();
        assert_eq!(sub.year, "20x3");
        assert_eq!(sub.month, "13");
    }

    #[test]
    fn test_sub_path_dot_inside_name() {
        let sub = sub_path("Site.v2_T_Raw_2023_07_15_1200").unwrap();
        assert_eq!(sub.to_string(), "2023/07");

        let sub = sub_path("Site.v2_T_Raw_2023_07_15_1200.dat").unwrap();
        assert_eq!(sub.to_string(), "2023/07");
    }

    #[test]
    fn test_sub_path_too_few_segments() {
        for name in ["data.dat", "a_b.dat", "a_b_c.dat", ""] {
            let err = sub_path(name).unwrap_err();
            assert_eq!(err.filename, name);
            assert!(err.segments < 4);
        }
    }

    #[test]
    fn test_destination_key() {
        let meta = metadata("LTAR_FIELD1", "LTAR_TABLE2");
        let key = DestinationKey::derive("cafmet", &meta, FILENAME, "LTAR_").unwrap();

        assert_eq!(
            key.to_string(),
            "cafmet/FIELD1TABLE2_V12345/2023/07/FIELD1EC_TABLE2_Raw_2023_07_15_1200.dat"
        );
        assert_eq!(
            key,
            DestinationKey::derive("cafmet", &meta, FILENAME, "LTAR_").unwrap()
        );
    }
}
