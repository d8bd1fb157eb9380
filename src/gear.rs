//! Typed gear configuration and antsApplyTransforms command assembly.
//!
//! A gear invocation is driven by a `config.json` with two sections:
//! `inputs`, mapping input names to staged file paths, and `config`,
//! holding the user-set options. The open-ended JSON is validated into
//! [`ApplyTransformsConfig`] up front; every missing or ill-typed field is
//! reported in one configuration error.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{GearError, Result};
use crate::transforms::{resolve_transforms, TransformSlot};

const NUM_SLOTS: usize = 9;

#[derive(Debug, Deserialize)]
struct RawGearConfig {
    #[serde(default)]
    config: serde_json::Map<String, Value>,
    #[serde(default)]
    inputs: BTreeMap<String, FileInput>,
}

#[derive(Debug, Deserialize)]
struct FileInput {
    location: FileLocation,
}

#[derive(Debug, Deserialize)]
struct FileLocation {
    path: PathBuf,
}

/// Validated apply-transforms gear configuration.
#[derive(Debug, Clone)]
pub struct ApplyTransformsConfig {
    pub dimensionality: Option<i64>,
    pub input_image_type: Option<i64>,
    pub interpolation: Option<String>,
    pub verbose: Option<bool>,
    pub use_float: Option<bool>,
    pub input_file: PathBuf,
    pub reference_file: PathBuf,
    pub slots: Vec<TransformSlot>,
}

impl ApplyTransformsConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let raw: RawGearConfig = serde_json::from_str(&text)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawGearConfig) -> Result<Self> {
        let mut problems: Vec<String> = Vec::new();

        let input_file = raw
            .inputs
            .get("input_file")
            .map(|f| f.location.path.clone())
            .unwrap_or_else(|| {
                problems.push("missing required input `input_file`".into());
                PathBuf::new()
            });
        let reference_file = raw
            .inputs
            .get("reference_file")
            .map(|f| f.location.path.clone())
            .unwrap_or_else(|| {
                problems.push("missing required input `reference_file`".into());
                PathBuf::new()
            });

        let dimensionality = opt_integer(&raw.config, "dimensionality", &mut problems);
        let input_image_type = opt_integer(&raw.config, "input_image_type", &mut problems);
        let interpolation = opt_string(&raw.config, "interpolation", &mut problems);
        let verbose = opt_bool(&raw.config, "verbose", &mut problems);
        let use_float = opt_bool(&raw.config, "float", &mut problems);

        let mut slots = Vec::with_capacity(NUM_SLOTS);
        for n in 1..=NUM_SLOTS {
            let file = raw
                .inputs
                .get(&format!("transform_file_{n}"))
                .map(|f| f.location.path.clone());
            let target = opt_string(&raw.config, &format!("transform_target_{n}"), &mut problems);
            let invert = opt_bool(&raw.config, &format!("invert_transform_{n}"), &mut problems)
                .unwrap_or(false);
            slots.push(TransformSlot {
                file,
                target,
                invert,
            });
        }

        if problems.is_empty() {
            Ok(Self {
                dimensionality,
                input_image_type,
                interpolation,
                verbose,
                use_float,
                input_file,
                reference_file,
                slots,
            })
        } else {
            Err(GearError::config(problems.join("; ")))
        }
    }
}

fn opt_integer(
    config: &serde_json::Map<String, Value>,
    key: &str,
    problems: &mut Vec<String>,
) -> Option<i64> {
    match config.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) if n.is_i64() => n.as_i64(),
        Some(other) => {
            problems.push(format!("`{key}` must be an integer, got {other}"));
            None
        }
    }
}

fn opt_string(
    config: &serde_json::Map<String, Value>,
    key: &str,
    problems: &mut Vec<String>,
) -> Option<String> {
    match config.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => {
            problems.push(format!("`{key}` must be a string, got {other}"));
            None
        }
    }
}

fn opt_bool(
    config: &serde_json::Map<String, Value>,
    key: &str,
    problems: &mut Vec<String>,
) -> Option<bool> {
    match config.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::Bool(b)) => Some(*b),
        Some(other) => {
            problems.push(format!("`{key}` must be a boolean, got {other}"));
            None
        }
    }
}

/// Output file name for a warped image: the input basename with its
/// extension (and a trailing `.nii`) stripped, plus `_warped.nii.gz`.
pub fn warped_output_name(input_file: &Path) -> String {
    let basename = input_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut parts: Vec<&str> = basename.split('.').collect();
    if parts.len() >= 2 {
        parts.pop();
        if parts.last() == Some(&"nii") {
            parts.pop();
        }
    }
    format!("{}_warped.nii.gz", parts.join("."))
}

/// Assembles the full antsApplyTransforms invocation: parameter flags,
/// input/reference/output files, then the resolved transform chain.
///
/// Transform resolution extracts any zip targets as a side effect.
pub fn build_command(
    config: &ApplyTransformsConfig,
    output_dir: &Path,
) -> Result<(PathBuf, Vec<String>)> {
    let program = match env::var_os("ANTSPATH") {
        Some(dir) => PathBuf::from(dir).join("antsApplyTransforms"),
        None => PathBuf::from("antsApplyTransforms"),
    };

    let mut args: Vec<String> = Vec::new();
    if let Some(d) = config.dimensionality {
        args.push("-d".into());
        args.push(d.to_string());
    }
    if let Some(e) = config.input_image_type {
        args.push("-e".into());
        args.push(e.to_string());
    }
    if let Some(n) = &config.interpolation {
        args.push("-n".into());
        args.push(n.clone());
    }
    if let Some(v) = config.verbose {
        args.push("-v".into());
        args.push(if v { "1" } else { "0" }.into());
    }
    if let Some(f) = config.use_float {
        args.push("--float".into());
        args.push(if f { "1" } else { "0" }.into());
    }

    args.push("-i".into());
    args.push(config.input_file.display().to_string());
    args.push("-r".into());
    args.push(config.reference_file.display().to_string());
    args.push("-o".into());
    args.push(
        output_dir
            .join(warped_output_name(&config.input_file))
            .display()
            .to_string(),
    );

    args.extend(resolve_transforms(&config.slots)?);
    Ok((program, args))
}

/// Runs the external tool, blocking until it exits. No timeout: a hung
/// process hangs the whole job.
pub fn run_command(program: &Path, args: &[String], cwd: &Path) -> Result<()> {
    log::info!("running: {} {}", program.display(), args.join(" "));
    let status = Command::new(program).args(args).current_dir(cwd).status()?;
    if !status.success() {
        return Err(GearError::ExternalProcess {
            program: program.display().to_string(),
            status,
        });
    }
    Ok(())
}

/// Writes `.manifest.json` into the output directory, listing the files
/// produced there.
pub fn write_manifest(output_dir: &Path) -> Result<PathBuf> {
    let mut files: Vec<String> = Vec::new();
    for entry in fs::read_dir(output_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    files.sort();
    let manifest = serde_json::json!({ "acquisition": { "files": files } });
    let path = output_dir.join(".manifest.json");
    fs::write(&path, serde_json::to_string_pretty(&manifest)?)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<ApplyTransformsConfig> {
        let raw: RawGearConfig = serde_json::from_str(json).unwrap();
        ApplyTransformsConfig::from_raw(raw)
    }

    const FULL_CONFIG: &str = r#"{
        "config": {
            "dimensionality": 3,
            "interpolation": "Linear",
            "verbose": true,
            "float": false,
            "invert_transform_2": true
        },
        "inputs": {
            "input_file": {"location": {"path": "/in/subj.nii.gz"}},
            "reference_file": {"location": {"path": "/in/template.nii.gz"}},
            "transform_file_1": {"location": {"path": "/in/affine.mat"}},
            "transform_file_2": {"location": {"path": "/in/warp.nii.gz"}}
        }
    }"#;

    #[test]
    fn full_config_parses_into_typed_fields() {
        let config = parse(FULL_CONFIG).unwrap();
        assert_eq!(config.dimensionality, Some(3));
        assert_eq!(config.input_image_type, None);
        assert_eq!(config.interpolation.as_deref(), Some("Linear"));
        assert_eq!(config.verbose, Some(true));
        assert_eq!(config.use_float, Some(false));
        assert_eq!(config.slots.len(), 9);
        assert_eq!(config.slots[0].file.as_deref(), Some(Path::new("/in/affine.mat")));
        assert!(config.slots[1].invert);
        assert!(config.slots[2].file.is_none());
    }

    #[test]
    fn missing_inputs_and_bad_types_reported_together() {
        let err = parse(
            r#"{
                "config": {"dimensionality": "three", "verbose": 1},
                "inputs": {}
            }"#,
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("input_file"));
        assert!(msg.contains("reference_file"));
        assert!(msg.contains("dimensionality"));
        assert!(msg.contains("verbose"));
    }

    #[test]
    fn warped_output_name_strips_nii_gz() {
        assert_eq!(
            warped_output_name(Path::new("/in/subj_T1.nii.gz")),
            "subj_T1_warped.nii.gz"
        );
        assert_eq!(warped_output_name(Path::new("scan.nii")), "scan_warped.nii.gz");
        assert_eq!(warped_output_name(Path::new("scan")), "scan_warped.nii.gz");
    }

    #[test]
    fn command_orders_params_inputs_then_transforms() {
        let config = parse(FULL_CONFIG).unwrap();
        let (_, args) = build_command(&config, Path::new("/out")).unwrap();
        assert_eq!(
            args,
            vec![
                "-d", "3",
                "-n", "Linear",
                "-v", "1",
                "--float", "0",
                "-i", "/in/subj.nii.gz",
                "-r", "/in/template.nii.gz",
                "-o", "/out/subj_warped.nii.gz",
                "-t", "/in/affine.mat",
                "-t", "[/in/warp.nii.gz, 1]",
            ]
        );
    }

    #[test]
    fn too_few_transforms_fails_command_build() {
        let config = parse(
            r#"{
                "config": {},
                "inputs": {
                    "input_file": {"location": {"path": "/in/a.nii"}},
                    "reference_file": {"location": {"path": "/in/b.nii"}},
                    "transform_file_1": {"location": {"path": "/in/only.mat"}}
                }
            }"#,
        )
        .unwrap();
        let err = build_command(&config, Path::new("/out")).unwrap_err();
        assert!(matches!(err, GearError::Configuration(_)), "{err}");
    }

    #[test]
    fn manifest_lists_output_files() {
        let dir = std::env::temp_dir().join(format!("gearkit_manifest_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("b_warped.nii.gz"), b"x").unwrap();
        fs::write(dir.join("a.log"), b"x").unwrap();

        let path = write_manifest(&dir).unwrap();
        let manifest: Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(
            manifest["acquisition"]["files"],
            serde_json::json!(["a.log", "b_warped.nii.gz"])
        );
        fs::remove_dir_all(&dir).ok();
    }
}
