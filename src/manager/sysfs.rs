//! Finding the input nodes the kernel created for a uhid device.
//!
//! Every HID device shows up under `/sys/bus/hid/devices/<id>/` with a
//! `uevent` file carrying `HID_UNIQ`. Once a driver has bound, its input
//! devices sit below `input/inputN/eventM`, and `/dev/input/eventM` is the
//! node clients open.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::trace;

pub fn find_input_nodes(sys_root: &Path, dev_root: &Path, uniq: &str) -> io::Result<Vec<PathBuf>> {
    let hid_devices = sys_root.join("bus/hid/devices");
    let entries = match fs::read_dir(&hid_devices) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut nodes = Vec::new();
    for entry in entries {
        let hid_dir = entry?.path();
        if hid_uniq(&hid_dir).as_deref() != Some(uniq) {
            continue;
        }
        trace!("{} belongs to {}", hid_dir.display(), uniq);
        nodes.extend(event_nodes(&hid_dir, dev_root)?);
    }
    nodes.sort();
    Ok(nodes)
}

fn hid_uniq(hid_dir: &Path) -> Option<String> {
    // The directory may vanish between listing and reading
    let uevent = fs::read_to_string(hid_dir.join("uevent")).ok()?;
    uevent
        .lines()
        .find_map(|line| line.strip_prefix("HID_UNIQ="))
        .map(str::to_string)
}

fn event_nodes(hid_dir: &Path, dev_root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut nodes = Vec::new();
    for input_dir in list_prefixed(&hid_dir.join("input"), "input")? {
        for event in list_prefixed(&input_dir, "event")? {
            let Some(name) = event.file_name() else {
                continue;
            };
            let node = dev_root.join("input").join(name);
            if node.exists() {
                nodes.push(node);
            }
        }
    }
    Ok(nodes)
}

/// Entries of `dir` whose name starts with `prefix`; a missing directory
/// is just empty
fn list_prefixed(dir: &Path, prefix: &str) -> io::Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with(prefix) {
            paths.push(entry.path());
        }
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_hid(sys: &Path, dev: &Path, id: &str, uniq: &str, events: &[&str]) {
        let hid_dir = sys.join("bus/hid/devices").join(id);
        fs::create_dir_all(&hid_dir).unwrap();
        fs::write(
            hid_dir.join("uevent"),
            format!("DRIVER=hid-generic\nHID_ID=0003:0000054C:00000268\nHID_UNIQ={}\n", uniq),
        )
        .unwrap();
        fs::create_dir_all(dev.join("input")).unwrap();
        for (n, event) in events.iter().enumerate() {
            fs::create_dir_all(hid_dir.join(format!("input/input{}/{}", n + 10, event))).unwrap();
            fs::write(dev.join("input").join(event), b"").unwrap();
        }
    }

    #[test]
    fn finds_nodes_by_uniq() {
        let root = tempfile::tempdir().unwrap();
        let (sys, dev) = (root.path().join("sys"), root.path().join("dev"));
        fake_hid(&sys, &dev, "0003:054C:0268.0001", "uhid_a", &["event7", "event5"]);
        fake_hid(&sys, &dev, "0003:054C:0268.0002", "uhid_b", &["event9"]);

        let nodes = find_input_nodes(&sys, &dev, "uhid_a").unwrap();
        assert_eq!(
            nodes,
            vec![dev.join("input/event5"), dev.join("input/event7")]
        );
        assert_eq!(
            find_input_nodes(&sys, &dev, "uhid_b").unwrap(),
            vec![dev.join("input/event9")]
        );
    }

    #[test]
    fn unbound_device_has_no_nodes() {
        let root = tempfile::tempdir().unwrap();
        let (sys, dev) = (root.path().join("sys"), root.path().join("dev"));
        fake_hid(&sys, &dev, "0003:054C:0268.0003", "uhid_c", &[]);
        assert!(find_input_nodes(&sys, &dev, "uhid_c").unwrap().is_empty());
        assert!(find_input_nodes(&sys, &dev, "uhid_missing").unwrap().is_empty());
    }

    #[test]
    fn node_must_exist_under_dev() {
        let root = tempfile::tempdir().unwrap();
        let (sys, dev) = (root.path().join("sys"), root.path().join("dev"));
        fake_hid(&sys, &dev, "0003:054C:0268.0004", "uhid_d", &["event3"]);
        fs::remove_file(dev.join("input/event3")).unwrap();
        assert!(find_input_nodes(&sys, &dev, "uhid_d").unwrap().is_empty());
    }
}
