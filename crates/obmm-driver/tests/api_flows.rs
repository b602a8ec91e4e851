//! Integration tests for the OBMM context
//!
//! The control device is replaced by a recording fake; the sysfs tree is a
//! temporary directory laid out like `ub_bus_controller<N>/<dev>/ubc`.

use obmm_driver::abi::cmd::{
    ObmmCmdAddrQuery, ObmmCmdExport, ObmmCmdExportPid, ObmmCmdImport, ObmmCmdPreimport,
    OBMM_QUERY_BY_PA,
};
use obmm_driver::abi::{NUMA_NO_NODE, OBMM_MAX_LOCAL_NUMA_NODES};
use obmm_driver::vendor::{build_vendor_info, decode_vendor_info};
use obmm_driver::{
    ChannelCache, ControlChannel, ControlRequest, Eid, ExportAdaptation, ExportFlags, ImportFlags,
    MemDesc, Obmm, ObmmConfig, ObmmError, PreimportFlags, PreimportInfo, Result, UbAdaptor,
    UbcTree, UnexportFlags, UnimportFlags, VendorAdaptor, VendorInfo,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const EXPORT_MEM_ID: u64 = 11;
const IMPORT_MEM_ID: u64 = 21;
const UBA: u64 = 0x4000_0000;
const TOKEN: u32 = 77;

#[derive(Debug, Clone, PartialEq)]
enum Recorded {
    Export(ObmmCmdExport, VendorInfo),
    ExportPid(ObmmCmdExportPid, VendorInfo),
    Import(ObmmCmdImport),
    Unexport(u64),
    Unimport(u64),
    Declare(ObmmCmdPreimport),
    Undeclare(ObmmCmdPreimport),
    Query(ObmmCmdAddrQuery),
}

/// Stand-in for `/dev/obmm`: records every request and answers like the
/// driver would, or fails every request with `errno`.
#[derive(Debug, Default)]
struct FakeDriver {
    log: Mutex<Vec<Recorded>>,
    errno: Option<i32>,
}

impl FakeDriver {
    fn failing(errno: i32) -> Self {
        Self {
            errno: Some(errno),
            ..Self::default()
        }
    }

    fn log(&self) -> Vec<Recorded> {
        self.log.lock().unwrap().clone()
    }
}

/// Read the vendor blob the way the driver would copy it from userspace.
fn vendor_blob(ptr: u64, len: u16) -> VendorInfo {
    assert_ne!(ptr, 0);
    // SAFETY: the pointer and length come from a live VendorInfoBlob that
    // the caller keeps alive until submit returns.
    let bytes = unsafe { std::slice::from_raw_parts(ptr as *const u8, usize::from(len)) };
    decode_vendor_info(bytes).unwrap()
}

impl ControlChannel for FakeDriver {
    fn submit(&self, request: ControlRequest<'_>) -> Result<()> {
        let name = request.name();
        let entry = match request {
            ControlRequest::Export(cmd) => {
                let info = vendor_blob(cmd.vendor_info, cmd.vendor_len);
                cmd.mem_id = EXPORT_MEM_ID;
                cmd.uba = UBA;
                cmd.tokenid = TOKEN;
                Recorded::Export(*cmd, info)
            }
            ControlRequest::ExportPid(cmd) => {
                let info = vendor_blob(cmd.vendor_info, cmd.vendor_len);
                cmd.mem_id = EXPORT_MEM_ID + 1;
                cmd.uba = UBA;
                cmd.tokenid = TOKEN;
                Recorded::ExportPid(*cmd, info)
            }
            ControlRequest::Import(cmd) => {
                let recorded = *cmd;
                cmd.mem_id = IMPORT_MEM_ID;
                if cmd.numa_id == NUMA_NO_NODE {
                    cmd.numa_id = 4;
                }
                Recorded::Import(recorded)
            }
            ControlRequest::Unexport(cmd) => Recorded::Unexport(cmd.mem_id),
            ControlRequest::Unimport(cmd) => Recorded::Unimport(cmd.mem_id),
            ControlRequest::DeclarePreimport(cmd) => {
                let recorded = *cmd;
                cmd.numa_id = 3;
                Recorded::Declare(recorded)
            }
            ControlRequest::UndeclarePreimport(cmd) => Recorded::Undeclare(*cmd),
            ControlRequest::AddrQuery(cmd) => {
                let recorded = *cmd;
                if cmd.key_type == OBMM_QUERY_BY_PA {
                    cmd.mem_id = cmd.pa >> 12;
                    cmd.offset = cmd.pa & 0xfff;
                } else {
                    cmd.pa = (cmd.mem_id << 12) + cmd.offset;
                }
                Recorded::Query(recorded)
            }
        };
        self.log.lock().unwrap().push(entry);

        match self.errno {
            Some(errno) => Err(ObmmError::Driver {
                request: name,
                source: std::io::Error::from_raw_os_error(errno),
            }),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    fixups: AtomicUsize,
    cleanups: AtomicUsize,
}

/// Adaptor without sysfs: fixed UMMU 3 / NUMA 1, counts hook calls.
#[derive(Debug, Default)]
struct CountingAdaptor {
    counters: Arc<Counters>,
    reject: bool,
}

impl CountingAdaptor {
    fn fixup(&self) -> Result<()> {
        self.counters.fixups.fetch_add(1, Ordering::SeqCst);
        if self.reject {
            return Err(ObmmError::no_such_device("cna mismatch"));
        }
        Ok(())
    }
}

impl VendorAdaptor for CountingAdaptor {
    fn adapt_export(&self, _desc: &MemDesc) -> Result<ExportAdaptation> {
        Ok(ExportAdaptation {
            vendor_info: build_vendor_info(3)?,
            numa: 1,
        })
    }

    fn fixup_import(&self, _cmd: &mut ObmmCmdImport) -> Result<()> {
        self.fixup()
    }

    fn cleanup_import(&self, _cmd: &mut ObmmCmdImport) {
        self.counters.cleanups.fetch_add(1, Ordering::SeqCst);
    }

    fn fixup_preimport(&self, _cmd: &mut ObmmCmdPreimport) -> Result<()> {
        self.fixup()
    }

    fn cleanup_preimport(&self, _cmd: &mut ObmmCmdPreimport) {
        self.counters.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

fn add_controller(root: &Path, index: u32, attrs: &[(&str, &str)]) {
    let dir = root.join(format!("ub_bus_controller{index}/ubc{index}"));
    std::fs::create_dir_all(dir.join("ubc")).unwrap();
    for (name, value) in attrs {
        std::fs::write(dir.join(name), value).unwrap();
    }
}

/// Context over a fake sysfs with controller 2 owning EID 5 and
/// controller 0 owning EID 9 (primary CNA 0x10).
fn ub_context(root: &TempDir, driver: Arc<FakeDriver>) -> Obmm {
    add_controller(
        root.path(),
        2,
        &[("eid", "0x00000005"), ("ummu_map", "3"), ("numa", "1")],
    );
    add_controller(root.path(), 0, &[("eid", "9"), ("primary_cna", "0x10")]);

    let config = ObmmConfig::default().with_sysfs_root(root.path());
    let adaptor = UbAdaptor::new(UbcTree::new(root.path()));
    Obmm::with_parts(config, Box::new(adaptor), ChannelCache::preopened(driver))
}

fn counting_context(adaptor: CountingAdaptor, driver: Arc<FakeDriver>) -> Obmm {
    Obmm::with_parts(
        ObmmConfig::default(),
        Box::new(adaptor),
        ChannelCache::preopened(driver),
    )
}

fn remote_desc() -> MemDesc {
    MemDesc {
        addr: UBA,
        length: 2 << 20,
        seid: Eid::from_u128(9),
        deid: Eid::from_u128(5),
        tokenid: TOKEN,
        scna: 0x10,
        dcna: 0x20,
        priv_data: Vec::new(),
    }
}

#[test]
fn test_export_fills_descriptor() {
    let root = TempDir::new().unwrap();
    let driver = Arc::new(FakeDriver::default());
    let obmm = ub_context(&root, Arc::clone(&driver));

    let mut desc = MemDesc::new(Eid::from_u128(5));
    desc.scna = 0xdead;
    desc.dcna = 0xbeef;
    let mem_id = obmm
        .export(&[1 << 20, 0, 1 << 20], ExportFlags::ALLOW_MMAP, &mut desc)
        .unwrap();

    assert_eq!(mem_id, EXPORT_MEM_ID);
    assert_eq!(desc.addr, UBA);
    assert_eq!(desc.tokenid, TOKEN);
    assert_eq!(desc.length, 2 << 20);
    assert_eq!((desc.scna, desc.dcna), (0, 0));

    let log = driver.log();
    let [Recorded::Export(cmd, info)] = log.as_slice() else {
        panic!("unexpected requests: {log:?}");
    };
    assert_eq!(cmd.length, OBMM_MAX_LOCAL_NUMA_NODES as u64);
    assert_eq!(cmd.size[2], 1 << 20);
    assert!(cmd.size[3..].iter().all(|s| *s == 0));
    assert_eq!(cmd.flags, ExportFlags::ALLOW_MMAP.bits());
    assert_eq!(cmd.pxm_numa, 1);
    assert_eq!(cmd.vendor_len, 24);
    assert_eq!(cmd.deid, *Eid::from_u128(5).as_bytes());
    assert_eq!(cmd.priv_data, 0);
    assert_eq!(
        *info,
        VendorInfo::V1 {
            ummu_idx_mask: 0x8,
            on_chip: true
        }
    );
}

#[test]
fn test_export_rejects_unowned_eid_before_submission() {
    let root = TempDir::new().unwrap();
    let driver = Arc::new(FakeDriver::default());
    let obmm = ub_context(&root, Arc::clone(&driver));

    let mut desc = MemDesc::new(Eid::from_u128(6));
    let err = obmm.export(&[4096], ExportFlags::empty(), &mut desc).unwrap_err();
    assert!(matches!(err, ObmmError::NoSuchDevice { .. }));

    let mut zero = MemDesc::new(Eid::ZERO);
    let err = obmm.export(&[4096], ExportFlags::empty(), &mut zero).unwrap_err();
    assert!(matches!(err, ObmmError::InvalidArgument { .. }));

    assert!(driver.log().is_empty());
    assert_eq!(desc, MemDesc::new(Eid::from_u128(6)));
}

#[test]
fn test_export_rejects_too_many_sizes() {
    let driver = Arc::new(FakeDriver::default());
    let obmm = counting_context(CountingAdaptor::default(), Arc::clone(&driver));

    let sizes = [4096u64; OBMM_MAX_LOCAL_NUMA_NODES + 1];
    let mut desc = MemDesc::new(Eid::from_u128(5));
    assert!(matches!(
        obmm.export(&sizes, ExportFlags::empty(), &mut desc),
        Err(ObmmError::InvalidArgument { .. })
    ));
    assert!(driver.log().is_empty());
}

#[test]
fn test_export_rejects_overflowing_total_before_submission() {
    let driver = Arc::new(FakeDriver::default());
    let obmm = counting_context(CountingAdaptor::default(), Arc::clone(&driver));

    let mut desc = MemDesc::new(Eid::from_u128(5));
    assert!(matches!(
        obmm.export(&[u64::MAX, 1], ExportFlags::empty(), &mut desc),
        Err(ObmmError::InvalidArgument { .. })
    ));
    assert!(driver.log().is_empty());
    assert_eq!(desc, MemDesc::new(Eid::from_u128(5)));

    let mem_id = obmm
        .export(&[u64::MAX - 1, 1], ExportFlags::empty(), &mut desc)
        .unwrap();
    assert_eq!(mem_id, EXPORT_MEM_ID);
    assert_eq!(desc.length, u64::MAX);
}

#[test]
fn test_export_driver_failure_leaves_descriptor() {
    let driver = Arc::new(FakeDriver::failing(libc::ENOSPC));
    let obmm = counting_context(CountingAdaptor::default(), Arc::clone(&driver));

    let mut desc = MemDesc::new(Eid::from_u128(5));
    let err = obmm.export(&[4096], ExportFlags::empty(), &mut desc).unwrap_err();
    assert_eq!(err.errno(), libc::ENOSPC);
    assert_eq!(desc.addr, 0);
    assert_eq!(driver.log().len(), 1);
}

#[test]
fn test_export_useraddr() {
    let root = TempDir::new().unwrap();
    let driver = Arc::new(FakeDriver::default());
    let obmm = ub_context(&root, Arc::clone(&driver));

    let mut desc = MemDesc::new(Eid::from_u128(5));
    let mem_id = obmm
        .export_useraddr(1234, 0x7f00_0000_0000, 8192, ExportFlags::empty(), &mut desc)
        .unwrap();

    assert_eq!(mem_id, EXPORT_MEM_ID + 1);
    assert_eq!(desc.length, 8192);
    assert_eq!(desc.addr, UBA);

    let log = driver.log();
    let [Recorded::ExportPid(cmd, info)] = log.as_slice() else {
        panic!("unexpected requests: {log:?}");
    };
    assert_eq!((cmd.pid, cmd.va, cmd.length), (1234, 0x7f00_0000_0000, 8192));
    assert_eq!(cmd.pxm_numa, 1);
    assert_eq!(info.version(), 0);
}

#[test]
fn test_import_passes_descriptor_and_returns_numa() {
    let root = TempDir::new().unwrap();
    let driver = Arc::new(FakeDriver::default());
    let obmm = ub_context(&root, Arc::clone(&driver));

    let desc = remote_desc();
    let imported = obmm
        .import(&desc, ImportFlags::ALLOW_MMAP, 0, None)
        .unwrap();
    assert_eq!(imported.mem_id, IMPORT_MEM_ID);
    assert_eq!(imported.numa_id, 4);

    let hinted = obmm
        .import(&desc, ImportFlags::ALLOW_MMAP, 0, Some(2))
        .unwrap();
    assert_eq!(hinted.numa_id, 2);

    let log = driver.log();
    let Recorded::Import(cmd) = &log[0] else {
        panic!("unexpected request: {:?}", log[0]);
    };
    assert_eq!(cmd.addr, desc.addr);
    assert_eq!(cmd.length, desc.length);
    assert_eq!((cmd.scna, cmd.dcna), (0x10, 0x20));
    assert_eq!(cmd.numa_id, NUMA_NO_NODE);
    assert_eq!(cmd.mem_id, 0);
    assert_eq!(cmd.seid, *desc.seid.as_bytes());
}

#[test]
fn test_import_rejects_cna_mismatch() {
    let root = TempDir::new().unwrap();
    let driver = Arc::new(FakeDriver::default());
    let obmm = ub_context(&root, Arc::clone(&driver));

    let desc = MemDesc {
        scna: 0x11,
        ..remote_desc()
    };
    assert!(matches!(
        obmm.import(&desc, ImportFlags::empty(), 0, None),
        Err(ObmmError::NoSuchDevice { .. })
    ));
    assert!(driver.log().is_empty());
}

#[test]
fn test_import_base_dist_bounds() {
    let driver = Arc::new(FakeDriver::default());
    let obmm = counting_context(CountingAdaptor::default(), Arc::clone(&driver));
    let desc = remote_desc();

    for bad in [256, -1] {
        assert!(matches!(
            obmm.import(&desc, ImportFlags::NUMA_REMOTE, bad, None),
            Err(ObmmError::InvalidArgument { .. })
        ));
    }
    assert!(driver.log().is_empty());

    for good in [0, 255] {
        obmm.import(&desc, ImportFlags::NUMA_REMOTE, good, None)
            .unwrap();
    }

    // Inside a pre-import window the distance comes from the window
    obmm.import(
        &desc,
        ImportFlags::NUMA_REMOTE | ImportFlags::PREIMPORT,
        256,
        None,
    )
    .unwrap();
    obmm.import(&desc, ImportFlags::empty(), -1, None).unwrap();

    let dists: Vec<u8> = driver
        .log()
        .iter()
        .map(|r| match r {
            Recorded::Import(cmd) => cmd.base_dist,
            other => panic!("unexpected request: {other:?}"),
        })
        .collect();
    assert_eq!(&dists[..2], &[0, 255]);
}

#[test]
fn test_cleanup_runs_after_failed_submission() {
    let adaptor = CountingAdaptor::default();
    let counters = Arc::clone(&adaptor.counters);
    let driver = Arc::new(FakeDriver::failing(libc::EBUSY));
    let obmm = counting_context(adaptor, driver);

    let err = obmm
        .import(&remote_desc(), ImportFlags::empty(), 0, None)
        .unwrap_err();
    assert_eq!(err.errno(), libc::EBUSY);

    let mut info = PreimportInfo::default();
    assert!(obmm.preimport(&mut info, PreimportFlags::empty()).is_err());

    assert_eq!(counters.fixups.load(Ordering::SeqCst), 2);
    assert_eq!(counters.cleanups.load(Ordering::SeqCst), 2);
}

#[test]
fn test_fixup_failure_skips_submission_and_cleanup() {
    let adaptor = CountingAdaptor {
        reject: true,
        ..CountingAdaptor::default()
    };
    let counters = Arc::clone(&adaptor.counters);
    let driver = Arc::new(FakeDriver::default());
    let obmm = counting_context(adaptor, Arc::clone(&driver));

    assert!(obmm
        .import(&remote_desc(), ImportFlags::empty(), 0, None)
        .is_err());
    let mut info = PreimportInfo::default();
    assert!(obmm.preimport(&mut info, PreimportFlags::empty()).is_err());

    assert!(driver.log().is_empty());
    assert_eq!(counters.fixups.load(Ordering::SeqCst), 2);
    assert_eq!(counters.cleanups.load(Ordering::SeqCst), 0);
}

#[test]
fn test_preimport_updates_numa() {
    let root = TempDir::new().unwrap();
    let driver = Arc::new(FakeDriver::default());
    let obmm = ub_context(&root, Arc::clone(&driver));

    let mut info = PreimportInfo {
        pa: 0x8000_0000,
        length: 1 << 30,
        base_dist: 20,
        numa_id: NUMA_NO_NODE,
        seid: Eid::from_u128(9),
        deid: Eid::from_u128(5),
        scna: 0x10,
        dcna: 0x20,
        priv_data: Vec::new(),
    };
    obmm.preimport(&mut info, PreimportFlags::ALLOW_MMAP).unwrap();
    assert_eq!(info.numa_id, 3);

    obmm.unpreimport(&info, PreimportFlags::empty()).unwrap();

    let log = driver.log();
    let [Recorded::Declare(declared), Recorded::Undeclare(undeclared)] = log.as_slice() else {
        panic!("unexpected requests: {log:?}");
    };
    assert_eq!(declared.base_dist, 20);
    assert_eq!(declared.numa_id, NUMA_NO_NODE);
    assert_eq!(undeclared.numa_id, 3);
    assert_eq!(undeclared.pa, 0x8000_0000);
}

#[test]
fn test_preimport_base_dist_bounds() {
    let driver = Arc::new(FakeDriver::default());
    let obmm = counting_context(CountingAdaptor::default(), Arc::clone(&driver));

    for bad in [256, -1] {
        let mut info = PreimportInfo {
            base_dist: bad,
            ..PreimportInfo::default()
        };
        assert!(matches!(
            obmm.preimport(&mut info, PreimportFlags::empty()),
            Err(ObmmError::InvalidArgument { .. })
        ));
    }
    for good in [0, 255] {
        let mut info = PreimportInfo {
            base_dist: good,
            ..PreimportInfo::default()
        };
        obmm.preimport(&mut info, PreimportFlags::empty()).unwrap();
    }
    assert_eq!(driver.log().len(), 2);
}

#[test]
fn test_unpreimport_skips_adaptor() {
    let adaptor = CountingAdaptor {
        reject: true,
        ..CountingAdaptor::default()
    };
    let counters = Arc::clone(&adaptor.counters);
    let driver = Arc::new(FakeDriver::default());
    let obmm = counting_context(adaptor, Arc::clone(&driver));

    obmm.unpreimport(&PreimportInfo::default(), PreimportFlags::empty())
        .unwrap();
    assert_eq!(counters.fixups.load(Ordering::SeqCst), 0);
    assert_eq!(driver.log().len(), 1);
}

#[test]
fn test_unexport_and_unimport() {
    let driver = Arc::new(FakeDriver::default());
    let obmm = counting_context(CountingAdaptor::default(), Arc::clone(&driver));

    assert!(matches!(
        obmm.unexport(0, UnexportFlags::empty()),
        Err(ObmmError::InvalidArgument { .. })
    ));
    assert!(matches!(
        obmm.unimport(0, UnimportFlags::FORCE),
        Err(ObmmError::InvalidArgument { .. })
    ));
    assert!(driver.log().is_empty());

    obmm.unexport(EXPORT_MEM_ID, UnexportFlags::empty()).unwrap();
    obmm.unimport(IMPORT_MEM_ID, UnimportFlags::FORCE).unwrap();
    assert_eq!(
        driver.log(),
        vec![
            Recorded::Unexport(EXPORT_MEM_ID),
            Recorded::Unimport(IMPORT_MEM_ID)
        ]
    );
}

#[test]
fn test_address_queries() {
    let driver = Arc::new(FakeDriver::default());
    let obmm = counting_context(CountingAdaptor::default(), Arc::clone(&driver));

    assert_eq!(obmm.query_memid_by_pa(0x5123).unwrap(), (5, 0x123));
    assert_eq!(obmm.query_pa_by_memid(5, 0x123).unwrap(), 0x5123);
    assert_eq!(driver.log().len(), 2);
}

#[test]
fn test_channel_opened_once_across_operations() {
    let opens = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&opens);
    let driver = Arc::new(FakeDriver::default());
    let shared = Arc::clone(&driver);
    let channels = ChannelCache::with_opener(move || {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(ObmmError::DeviceOpen {
                path: "/dev/obmm".into(),
                source: std::io::Error::from_raw_os_error(libc::EACCES),
            });
        }
        Ok(Arc::clone(&shared) as Arc<dyn ControlChannel>)
    });
    let obmm = Obmm::with_parts(
        ObmmConfig::default(),
        Box::new(CountingAdaptor::default()),
        channels,
    );

    let err = obmm.unexport(1, UnexportFlags::empty()).unwrap_err();
    assert_eq!(err.errno(), libc::EACCES);

    obmm.unexport(1, UnexportFlags::empty()).unwrap();
    obmm.unimport(2, UnimportFlags::empty()).unwrap();
    obmm.query_pa_by_memid(1, 0).unwrap();

    assert_eq!(opens.load(Ordering::SeqCst), 2);
    assert_eq!(driver.log().len(), 3);
}

#[test]
fn test_descriptor_exchange_between_nodes() {
    let root = TempDir::new().unwrap();
    let desc_dir = TempDir::new().unwrap();
    let driver = Arc::new(FakeDriver::default());
    let obmm = ub_context(&root, Arc::clone(&driver));

    let mut desc = MemDesc::new(Eid::from_u128(5));
    desc.seid = Eid::from_u128(9);
    let mem_id = obmm.export(&[4096], ExportFlags::empty(), &mut desc).unwrap();
    desc.save(desc_dir.path(), mem_id).unwrap();

    // The importer fills in the channel adapters it reaches the exporter by
    let mut remote = MemDesc::load(desc_dir.path(), mem_id).unwrap();
    assert_eq!(remote, desc);
    remote.scna = 0x10;
    let imported = obmm
        .import(&remote, ImportFlags::ALLOW_MMAP, 0, None)
        .unwrap();
    assert_eq!(imported.mem_id, IMPORT_MEM_ID);
}
