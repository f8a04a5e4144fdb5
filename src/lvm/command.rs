//! LvmBackend over the lvm2 and dd command-line tools

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::crd::{Snapshot, Volume, VolumeGroup};
use crate::error::{Error, Result};

use super::{dev_path, snapshot_lv_name, LvmBackend};

/// Command-line backed LvmBackend
#[derive(Default)]
pub struct Lvm;

impl Lvm {
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<String> {
        debug!(program, ?args, "running lvm command");
        let output = Command::new(program).args(args).output().await?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(Error::LvmCommand {
                program: program.to_string(),
                output: text,
            });
        }
        Ok(text)
    }
}

#[async_trait]
impl LvmBackend for Lvm {
    async fn list_volume_groups(&self) -> Result<Vec<VolumeGroup>> {
        let out = self.run("vgs", &vgs_args()).await?;
        decode_vgs_report(&out)
    }

    async fn create_volume(&self, vol: &Volume) -> Result<()> {
        let dev = dev_path(&vol.spec.vol_group, vol.name());
        if self.path_exists(&dev).await? {
            return Ok(());
        }
        let args = lvcreate_args(vol);
        self.run("lvcreate", &args).await?;
        info!(volume = vol.name(), vg = %vol.spec.vol_group, "created logical volume");
        Ok(())
    }

    async fn delete_volume(&self, vol: &Volume) -> Result<()> {
        let dev = dev_path(&vol.spec.vol_group, vol.name());
        if !self.path_exists(&dev).await? {
            return Ok(());
        }
        self.run("lvremove", &["-y".to_string(), dev]).await?;
        info!(volume = vol.name(), "removed logical volume");
        Ok(())
    }

    async fn create_snapshot(&self, snap: &Snapshot) -> Result<()> {
        let lv = snapshot_lv_name(snap.name());
        let dev = dev_path(&snap.spec.vol_group, lv);
        if self.path_exists(&dev).await? {
            return Ok(());
        }
        let args = lvcreate_snapshot_args(snap);
        self.run("lvcreate", &args).await?;
        info!(snapshot = snap.name(), vg = %snap.spec.vol_group, "created snapshot");
        Ok(())
    }

    async fn delete_snapshot(&self, snap: &Snapshot) -> Result<()> {
        let dev = dev_path(&snap.spec.vol_group, snapshot_lv_name(snap.name()));
        if !self.path_exists(&dev).await? {
            return Ok(());
        }
        self.run("lvremove", &["-y".to_string(), dev]).await?;
        info!(snapshot = snap.name(), "removed snapshot");
        Ok(())
    }

    async fn path_exists(&self, path: &str) -> Result<bool> {
        match tokio::fs::metadata(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn clone_device(&self, source: &str, dest: &str) -> Result<()> {
        let args = vec![
            format!("if={source}"),
            format!("of={dest}"),
            "bs=4M".to_string(),
            "conv=fsync".to_string(),
        ];
        self.run("dd", &args).await?;
        info!(source, dest, "cloned device");
        Ok(())
    }
}

// =============================================================================
// Argument builders
// =============================================================================

fn vgs_args() -> Vec<String> {
    [
        "--options",
        "vg_name,vg_uuid,vg_size,vg_free,lv_count,pv_count,snap_count,max_lv,vg_missing_pv_count",
        "--reportformat",
        "json",
        "--units",
        "b",
        "--nosuffix",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn lvcreate_args(vol: &Volume) -> Vec<String> {
    let size = format!("{}b", vol.spec.capacity);
    if vol.spec.thin_provision {
        vec![
            "-y".to_string(),
            "-T".to_string(),
            format!("{0}/{0}_thinpool", vol.spec.vol_group),
            "-V".to_string(),
            size,
            "-n".to_string(),
            vol.name().to_string(),
        ]
    } else {
        vec![
            "-y".to_string(),
            "-L".to_string(),
            size,
            "-n".to_string(),
            vol.name().to_string(),
            vol.spec.vol_group.clone(),
        ]
    }
}

fn lvcreate_snapshot_args(snap: &Snapshot) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "--snapshot".to_string(),
        "--name".to_string(),
        snapshot_lv_name(snap.name()).to_string(),
        "--permission".to_string(),
        "r".to_string(),
    ];
    if snap.spec.snap_size > 0 {
        args.push("--size".to_string());
        args.push(format!("{}b", snap.spec.snap_size));
    }
    args.push(dev_path(&snap.spec.vol_group, &snap.spec.source_volume));
    args
}

// =============================================================================
// Report decoding
// =============================================================================

#[derive(Deserialize)]
struct VgsReport {
    report: Vec<VgsReportEntry>,
}

#[derive(Deserialize)]
struct VgsReportEntry {
    #[serde(default)]
    vg: Vec<VgsRow>,
}

/// lvm2 reports every column as a string even with --units b --nosuffix
#[derive(Deserialize)]
struct VgsRow {
    vg_name: String,
    #[serde(default)]
    vg_uuid: String,
    vg_size: String,
    vg_free: String,
    #[serde(default)]
    lv_count: String,
    #[serde(default)]
    pv_count: String,
    #[serde(default)]
    snap_count: String,
    #[serde(default)]
    max_lv: String,
    #[serde(default)]
    vg_missing_pv_count: String,
}

/// Decode the vgs JSON report. Device-mapper noise on mixed-up pools is
/// scrubbed first; lvm prints those lines before the report body.
fn decode_vgs_report(raw: &str) -> Result<Vec<VolumeGroup>> {
    let cleaned: String = raw
        .lines()
        .filter(|line| {
            !line.contains("No such device or address") && !line.trim_start().starts_with("WARNING")
        })
        .collect::<Vec<_>>()
        .join("\n");

    let report: VgsReport = serde_json::from_str(&cleaned)?;
    let mut groups = Vec::new();
    for entry in report.report {
        for row in entry.vg {
            groups.push(VolumeGroup {
                name: row.vg_name,
                uuid: row.vg_uuid,
                size: parse_field(&row.vg_size)?,
                free: parse_field(&row.vg_free)?,
                lv_count: parse_field(&row.lv_count)?,
                pv_count: parse_field(&row.pv_count)?,
                snap_count: parse_field(&row.snap_count)?,
                max_lv: parse_field(&row.max_lv)?,
                missing_pv_count: parse_field(&row.vg_missing_pv_count)?,
            });
        }
    }
    Ok(groups)
}

fn parse_field<T: std::str::FromStr + Default>(raw: &str) -> Result<T> {
    if raw.is_empty() {
        return Ok(T::default());
    }
    raw.parse()
        .map_err(|_| Error::ReportParse(format!("bad numeric field {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{SnapshotSpec, VolumeSpec, LUN_UNSET};

    fn volume(thin: bool) -> Volume {
        let mut vol = Volume::new(
            "vol-1",
            VolumeSpec {
                owner_node_id: "node-1".into(),
                vol_group: "data1".into(),
                vg_pattern: "^data.*$".into(),
                capacity: 5 << 30,
                shared: false,
                thin_provision: thin,
                iscsi_target: String::new(),
                iscsi_lun: LUN_UNSET,
                iscsi_block: String::new(),
                iscsi_acl_is_set: false,
                mount_nodes: Vec::new(),
                data_source: None,
                data_source_type: None,
            },
        );
        vol.metadata.name = Some("vol-1".into());
        vol
    }

    #[test]
    fn test_lvcreate_args_normal() {
        let args = lvcreate_args(&volume(false));
        assert_eq!(args, vec!["-y", "-L", "5368709120b", "-n", "vol-1", "data1"]);
    }

    #[test]
    fn test_lvcreate_args_thin() {
        let args = lvcreate_args(&volume(true));
        assert_eq!(
            args,
            vec!["-y", "-T", "data1/data1_thinpool", "-V", "5368709120b", "-n", "vol-1"]
        );
    }

    #[test]
    fn test_lvcreate_snapshot_args() {
        let mut snap = Snapshot::new(
            "snapshot-s1",
            SnapshotSpec {
                owner_node_id: "node-1".into(),
                vol_group: "data1".into(),
                vg_pattern: "^data.*$".into(),
                snap_size: 1 << 30,
                source_volume: "vol-1".into(),
            },
        );
        snap.metadata.name = Some("snapshot-s1".into());

        let args = lvcreate_snapshot_args(&snap);
        assert_eq!(
            args,
            vec![
                "-y",
                "--snapshot",
                "--name",
                "s1",
                "--permission",
                "r",
                "--size",
                "1073741824b",
                "/dev/data1/vol-1"
            ]
        );
    }

    #[test]
    fn test_decode_vgs_report_scrubs_noise() {
        let raw = r#"  /dev/sdb: open failed: No such device or address
  WARNING: Couldn't find device with uuid abc.
{
    "report": [
        {
            "vg": [
                {"vg_name": "data1", "vg_uuid": "u-1", "vg_size": "107374182400",
                 "vg_free": "53687091200", "lv_count": "3", "pv_count": "1",
                 "snap_count": "1", "max_lv": "0", "vg_missing_pv_count": "0"}
            ]
        }
    ]
}"#;
        let groups = decode_vgs_report(raw).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "data1");
        assert_eq!(groups[0].size, 100 << 30);
        assert_eq!(groups[0].free, 50 << 30);
        assert_eq!(groups[0].lv_count, 3);
    }

    #[tokio::test]
    async fn test_path_exists_on_real_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("dev");
        std::fs::write(&file, b"").unwrap();

        let lvm = Lvm::new();
        assert!(lvm.path_exists(file.to_str().unwrap()).await.unwrap());
        let missing = dir.path().join("missing");
        assert!(!lvm.path_exists(missing.to_str().unwrap()).await.unwrap());
    }

    #[test]
    fn test_decode_vgs_report_bad_number() {
        let raw = r#"{"report": [{"vg": [{"vg_name": "data1", "vg_size": "x", "vg_free": "0"}]}]}"#;
        assert!(decode_vgs_report(raw).is_err());
    }
}
