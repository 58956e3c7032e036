//! Control units
//!
//! A control unit is the executable the external scheduler invokes for one
//! camera. It only assigns single-quoted variables and execs
//! `lookout tick <camera>`; the relay command line is built later from an
//! argument vector, never by the shell. The unit doubles as the camera's
//! persisted identity: `parse` is the exact inverse of `render`.

use crate::camera::{CameraIdentity, Transport, validate_name};
use crate::error::{Error, Result};
use crate::manifest::LookoutConfig;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

/// File suffix of control units
pub const UNIT_SUFFIX: &str = ".sh";

/// Units embed credentials, so only the owner may read them
const UNIT_MODE: u32 = 0o700;

/// Fixed inputs shared by every unit on this host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitTemplate {
    pub supervisor_bin: PathBuf,
    pub config_path: PathBuf,
    pub overlay_asset: PathBuf,
    pub maintenance_asset: PathBuf,
}

impl UnitTemplate {
    pub fn from_config(config: &LookoutConfig) -> Self {
        Self {
            supervisor_bin: config.supervisor_bin(),
            config_path: config.config_path(),
            overlay_asset: config.relay.overlay_asset.clone(),
            maintenance_asset: config.relay.maintenance_asset.clone(),
        }
    }
}

/// A parsed control unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlUnit {
    pub identity: CameraIdentity,
    pub overlay_asset: PathBuf,
    pub maintenance_asset: PathBuf,
}

/// Path of a camera's control unit
pub fn unit_path(base_dir: &Path, name: &str) -> PathBuf {
    base_dir.join(format!("{}{}", name, UNIT_SUFFIX))
}

/// Render a control unit
///
/// Pure function of its inputs: the same identity and template always give
/// byte-identical output.
pub fn render(identity: &CameraIdentity, template: &UnitTemplate) -> String {
    let mut out = String::new();
    out.push_str("#!/bin/sh\n");
    out.push_str(&format!(
        "# lookout control unit for camera {}\n",
        identity.name
    ));
    out.push_str("# Generated by lookout; edits are overwritten on the next update.\n");

    let vars: [(&str, String); 9] = [
        ("CAMERA_NAME", identity.name.clone()),
        ("CAMERA_ADDRESS", identity.address.clone()),
        ("CAMERA_USER", identity.user.clone()),
        ("CAMERA_SECRET", identity.secret.clone()),
        ("CAMERA_PORT", identity.port.to_string()),
        ("CAMERA_TRANSPORT", identity.transport.as_str().to_string()),
        ("CAMERA_STREAM_KEY", identity.stream_key.clone()),
        (
            "OVERLAY_ASSET",
            template.overlay_asset.to_string_lossy().into_owned(),
        ),
        (
            "MAINTENANCE_ASSET",
            template.maintenance_asset.to_string_lossy().into_owned(),
        ),
    ];
    for (key, value) in &vars {
        out.push_str(&format!("{}={}\n", key, shell_quote(value)));
    }

    out.push_str(&format!(
        "exec {} --config {} tick \"$CAMERA_NAME\"\n",
        shell_quote(&template.supervisor_bin.to_string_lossy()),
        shell_quote(&template.config_path.to_string_lossy()),
    ));
    out
}

/// Parse a rendered control unit back into its identity
pub fn parse(content: &str) -> std::result::Result<ControlUnit, String> {
    let mut vars = HashMap::new();
    for line in content.lines() {
        let Some((key, raw)) = line.split_once('=') else {
            continue;
        };
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_uppercase() || c == '_') {
            continue;
        }
        let value = shell_unquote(raw).ok_or_else(|| format!("bad quoting for {}", key))?;
        vars.insert(key.to_string(), value);
    }

    let mut take = |key: &str| vars.remove(key).ok_or_else(|| format!("missing {}", key));

    let name = take("CAMERA_NAME")?;
    let address = take("CAMERA_ADDRESS")?;
    let user = take("CAMERA_USER")?;
    let secret = take("CAMERA_SECRET")?;
    let port = take("CAMERA_PORT")?
        .parse::<u16>()
        .map_err(|e| format!("bad CAMERA_PORT: {}", e))?;
    let transport = take("CAMERA_TRANSPORT")?
        .parse::<Transport>()
        .map_err(|e| e.to_string())?;
    let stream_key = take("CAMERA_STREAM_KEY")?;
    let overlay_asset = PathBuf::from(take("OVERLAY_ASSET")?);
    let maintenance_asset = PathBuf::from(take("MAINTENANCE_ASSET")?);

    Ok(ControlUnit {
        identity: CameraIdentity {
            name,
            address,
            user,
            secret,
            port,
            transport,
            stream_key,
        },
        overlay_asset,
        maintenance_asset,
    })
}

/// Render and write a camera's unit, replacing any previous one atomically
pub fn write(
    base_dir: &Path,
    identity: &CameraIdentity,
    template: &UnitTemplate,
) -> Result<PathBuf> {
    identity.validate()?;

    let path = unit_path(base_dir, &identity.name);
    let tmp = base_dir.join(format!(".{}{}.tmp", identity.name, UNIT_SUFFIX));
    let wrap = |source: io::Error| Error::UnitWrite {
        path: path.clone(),
        source,
    };

    fs::create_dir_all(base_dir).map_err(wrap)?;

    // The mode only applies to a new file, so a leftover temp file goes first
    match fs::remove_file(&tmp) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(wrap(e)),
        _ => {}
    }
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(UNIT_MODE)
        .open(&tmp)
        .map_err(wrap)?;
    file.write_all(render(identity, template).as_bytes()).map_err(wrap)?;
    drop(file);
    // umask may have narrowed the creation mode
    fs::set_permissions(&tmp, fs::Permissions::from_mode(UNIT_MODE)).map_err(wrap)?;
    fs::rename(&tmp, &path).map_err(wrap)?;

    Ok(path)
}

/// Read a camera's unit; `None` when the camera does not exist
pub fn read(base_dir: &Path, name: &str) -> Result<Option<ControlUnit>> {
    if validate_name(name).is_err() {
        return Ok(None);
    }

    let path = unit_path(base_dir, name);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(Error::UnitRead { path, source }),
    };

    let unit = parse(&content).map_err(|message| Error::UnitParse {
        path: path.clone(),
        message,
    })?;
    if unit.identity.name != name {
        return Err(Error::UnitParse {
            path,
            message: format!("unit names camera '{}'", unit.identity.name),
        });
    }
    Ok(Some(unit))
}

/// Delete a camera's unit; returns whether one existed
pub fn remove(base_dir: &Path, name: &str) -> Result<bool> {
    if validate_name(name).is_err() {
        return Ok(false);
    }
    let path = unit_path(base_dir, name);
    match fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(Error::UnitWrite { path, source }),
    }
}

/// Names of every camera with a unit, sorted
///
/// A missing or unreadable base directory is an empty fleet.
pub fn list(base_dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(base_dir) else {
        return Vec::new();
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let file_name = entry.file_name().into_string().ok()?;
            let name = file_name.strip_suffix(UNIT_SUFFIX)?;
            validate_name(name).ok()?;
            Some(name.to_string())
        })
        .collect();
    names.sort();
    names
}

/// Quote a value for POSIX sh
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Inverse of `shell_quote`; `None` on anything it would not produce
fn shell_unquote(raw: &str) -> Option<String> {
    let mut out = String::new();
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => loop {
                match chars.next()? {
                    '\'' => break,
                    inner => out.push(inner),
                }
            },
            '\\' => out.push(chars.next()?),
            _ => return None,
        }
    }

    Some(out)
}
