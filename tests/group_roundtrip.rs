//! A small simulated file: a root group (v1, then dense) linking to a
//! handful of datasets, all through a single backing file and allocator.

use hdf5_engine::alloc::Allocator;
use hdf5_engine::dataset::{DatasetEngine, DatasetPlan};
use hdf5_engine::datatype::Datatype;
use hdf5_engine::group::{hard_link, GroupConfig, GroupEngine, GroupRepresentation};
use hdf5_engine::io::FileIo;
use hdf5_engine::superblock::Superblock;
use tempfile::NamedTempFile;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn new_file() -> (FileIo, Allocator) {
    init();
    let tmp = NamedTempFile::new().unwrap();
    let io = FileIo::from_file(tmp.reopen().unwrap()).unwrap();
    let alloc = Allocator::new(Superblock::current_len(8));
    (io, alloc)
}

#[test]
fn v1_group_of_datasets_resolves_every_child_by_name() {
    let (mut io, mut alloc) = new_file();

    let mut entries = Vec::new();
    for (name, n) in [("temperatures", 10u64), ("pressures", 20), ("flags", 3)] {
        let data: Vec<u8> = (0..n * 8).map(|i| (i % 256) as u8).collect();
        let plan = DatasetPlan::contiguous(vec![n], Datatype::f64());
        let addr = DatasetEngine::write(&mut io, &mut alloc, 8, &plan, &data).unwrap();
        entries.push((name.to_string(), addr));
    }

    let symtab = GroupEngine::write_v1(&mut io, &mut alloc, 8, entries.clone()).unwrap();

    for (name, expected_addr) in &entries {
        let addr = GroupEngine::lookup_v1(&io, &symtab, 8, name).unwrap();
        assert_eq!(addr, *expected_addr);
        let (_, dtype, _) = DatasetEngine::read(&io, addr, 8).unwrap();
        assert_eq!(dtype, Datatype::f64());
    }
}

#[test]
fn dense_group_survives_past_the_default_threshold() {
    let (mut io, mut alloc) = new_file();

    let mut links = Vec::new();
    for i in 0..50 {
        let data = vec![i as u8; 8];
        let plan = DatasetPlan::contiguous(vec![1], Datatype::u8());
        let addr = DatasetEngine::write(&mut io, &mut alloc, 8, &plan, &data).unwrap();
        links.push(hard_link(format!("member{i:03}"), addr));
    }

    let repr = GroupEngine::write_new_style(&mut io, &mut alloc, 8, 8, links.clone(), &GroupConfig::default()).unwrap();
    let link_info = match repr {
        GroupRepresentation::Dense(li) => li,
        GroupRepresentation::Compact(_) => panic!("50 links should have gone dense"),
    };

    for link in &links {
        let found = GroupEngine::lookup_dense(&io, &link_info, 8, 8, &link.name).unwrap();
        let addr = found.hard_target_address.unwrap();
        let (_, _, bytes) = DatasetEngine::read(&io, addr, 8).unwrap();
        assert_eq!(bytes.len(), 1);
    }
}
