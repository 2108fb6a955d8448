//! Pre-built mock array scenarios for testing.
//!
//! These scenarios provide realistic statistics blobs for a small array
//! with two storage processors, three disks, and three volumes.

use std::time::Duration;

use super::MockService;
use crate::collector::entity::EntityClass;

/// Columns shared by every block statistics manifest in the scenarios.
pub const BLOCK_COLUMNS: &[&str] = &[
    "InstanceID",
    "ElementType",
    "StatisticTime",
    "TotalIOs",
    "KBytesTransferred",
    "ReadIOs",
    "KBytesRead",
    "WriteIOs",
    "KBytesWritten",
];

/// Sample time used by [`MockService::typical_array`].
pub const SAMPLE_TIME: &str = "20230101120000.000000+000";

/// Sample time one interval later, see [`MockService::advance_interval`].
pub const NEXT_SAMPLE_TIME: &str = "20230101121000.000000+000";

const NA: &str = "18446744073709551615";

impl MockService {
    /// A small array sampling every 10 minutes, with every entity class
    /// populated and one pool (`Pool_0`) holding two disks and two volumes.
    pub fn typical_array(serial: &str) -> Self {
        let mut service = Self::new(Duration::from_secs(600));
        for class in EntityClass::ALL {
            service.add_manifest(class, BLOCK_COLUMNS);
        }
        service.fill_blobs(serial, SAMPLE_TIME);
        let disks = [disk_id(serial, "0_0_0"), disk_id(serial, "0_0_1")];
        let volumes = [volume_id(serial, 0), volume_id(serial, 1)];
        service.add_pool(
            "Pool_0",
            &[disks[0].as_str(), disks[1].as_str()],
            &[volumes[0].as_str(), volumes[1].as_str()],
        );
        service
    }

    /// Replaces every blob with the next sampling interval's data.
    pub fn advance_interval(&mut self, serial: &str) {
        self.fill_blobs(serial, NEXT_SAMPLE_TIME);
    }

    fn fill_blobs(&mut self, serial: &str, ts: &str) {
        // ElementType codes: 2 system, 3 front-end system, 6 front-end port,
        // 8 volume, 10 disk drive.
        self.set_blob(
            EntityClass::Array,
            format!("CLAR+{s};2;{ts};900;36000;500;20000;400;16000\n", s = serial, ts = ts),
        );
        self.set_blob(
            EntityClass::Disks,
            format!(
                "{d0};10;{ts};10;400;6;240;4;160\n\
                 {d1};10;{ts};20;800;12;480;8;320\n\
                 {d2};10;{ts};5;200;{na};{na};5;200\n",
                d0 = disk_id(serial, "0_0_0"),
                d1 = disk_id(serial, "0_0_1"),
                d2 = disk_id(serial, "0_0_2"),
                ts = ts,
                na = NA,
            ),
        );
        self.set_blob(
            EntityClass::StorageProcessors,
            format!(
                "CLAR+{s}+FEAdapt+SP-A;3;{ts};450;18000;250;10000;200;8000\n\
                 CLAR+{s}+FEAdapt+SP-B;3;{ts};450;18000;250;10000;200;8000\n",
                s = serial,
                ts = ts,
            ),
        );
        self.set_blob(
            EntityClass::StorageProcessorPorts,
            format!(
                "CLAR+{s}+FEPort+SP-A-0;6;{ts};450;18000;250;10000;200;8000\n",
                s = serial,
                ts = ts,
            ),
        );
        self.set_blob(EntityClass::Snapshots, String::new());
        self.set_blob(
            EntityClass::Volumes,
            format!(
                "{v0};8;{ts};100;4000;60;2400;40;1600\n\
                 {v1};8;{ts};50;2000;30;1200;20;800\n\
                 {v2};8;{ts};7;280;{na};{na};7;280\n",
                v0 = volume_id(serial, 0),
                v1 = volume_id(serial, 1),
                v2 = volume_id(serial, 2),
                ts = ts,
                na = NA,
            ),
        );
    }
}

/// Performance instance id of a disk at `bus_enclosure_slot`.
pub fn disk_id(serial: &str, bus_enclosure_slot: &str) -> String {
    format!("CLAR+{}+Disk+{}", serial, bus_enclosure_slot)
}

/// Performance instance id of volume number `lun`.
pub fn volume_id(serial: &str, lun: u32) -> String {
    format!("CLAR+{}+Lun+{}", serial, lun)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::manifest::decode;

    #[test]
    fn typical_array_blobs_match_manifests() {
        let service = MockService::typical_array("APM001");
        for class in EntityClass::ALL {
            let manifest = &service.manifests[&class];
            let blob = &service.blobs[class.blob_index()];
            assert!(decode(manifest, blob).is_ok(), "{} does not decode", class);
        }
    }

    #[test]
    fn typical_array_pool_members_exist() {
        let service = MockService::typical_array("APM001");
        let pool = &service.pools["Pool_0"];
        assert!(pool.disks.contains("CLAR+APM001+Disk+0_0_1"));
        assert!(pool.volumes.contains("CLAR+APM001+Lun+0"));
    }
}
