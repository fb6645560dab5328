//! Stream-level behavior: header validation, reference policies across
//! records, lifecycle hooks, raw blocks, opacity, and forbidden types.

use std::sync::Arc;

use snapgraph::{
    Obj, ReferencePolicy, Result, SnapError, SnapObject, Snapgraph, TypeRegistry, WireRead,
    WireWrite,
};

#[derive(Default, SnapObject)]
struct Marker {
    id: u64,
}

#[test]
fn foreign_bytes_are_rejected_by_magic() {
    let result: Result<Obj<Marker>> = Snapgraph::from_slice(b"NOTSNAP--------");
    assert!(matches!(result, Err(SnapError::WrongMagic)));
}

#[test]
fn unsupported_format_version_is_rejected() {
    let bytes = [b'S', b'G', b'R', 9, 0, 1];
    let result: Result<Obj<Marker>> = Snapgraph::from_slice(&bytes);
    assert!(matches!(result, Err(SnapError::WrongVersion(9))));
}

#[test]
fn mismatched_reference_policy_is_rejected_before_the_body() -> Result<()> {
    let writer = Snapgraph::builder().references(ReferencePolicy::Preserve);
    let bytes = writer.to_vec(&Obj::new(Marker { id: 1 }))?;

    let result: Result<Obj<Marker>> = Snapgraph::from_slice(&bytes);
    assert!(matches!(result, Err(SnapError::WrongStreamConfiguration(_))));
    Ok(())
}

#[test]
fn preserve_policy_deduplicates_across_records() -> Result<()> {
    let builder = Snapgraph::builder().references(ReferencePolicy::Preserve);
    let marker = Obj::new(Marker { id: 10 });

    let mut serializer = builder.serializer(Vec::new())?;
    serializer.serialize(&marker)?;
    serializer.serialize(&marker)?;
    let bytes = serializer.close()?;

    let mut deserializer = builder.deserializer(bytes.as_slice())?;
    let first: Obj<Marker> = deserializer.deserialize()?;
    let second: Obj<Marker> = deserializer.deserialize()?;
    assert!(Obj::ptr_eq(&first, &second));
    assert_eq!(first.borrow().id, 10);
    Ok(())
}

#[test]
fn do_not_preserve_policy_resets_between_records() -> Result<()> {
    let builder = Snapgraph::builder();
    let marker = Obj::new(Marker { id: 11 });

    let mut serializer = builder.serializer(Vec::new())?;
    serializer.serialize(&marker)?;
    serializer.serialize(&marker)?;
    let bytes = serializer.close()?;

    let mut deserializer = builder.deserializer(bytes.as_slice())?;
    let first: Obj<Marker> = deserializer.deserialize()?;
    let second: Obj<Marker> = deserializer.deserialize()?;
    assert!(!Obj::ptr_eq(&first, &second));
    assert_eq!(second.borrow().id, 11);
    Ok(())
}

#[test]
fn weak_policy_keeps_identity_while_objects_live() -> Result<()> {
    let builder = Snapgraph::builder().references(ReferencePolicy::WeakReference);
    let marker = Obj::new(Marker { id: 12 });

    let mut serializer = builder.serializer(Vec::new())?;
    serializer.serialize(&marker)?;
    serializer.serialize(&marker)?;
    let bytes = serializer.close()?;

    let mut deserializer = builder.deserializer(bytes.as_slice())?;
    let first: Obj<Marker> = deserializer.deserialize()?;
    let second: Obj<Marker> = deserializer.deserialize()?;
    assert!(Obj::ptr_eq(&first, &second));
    Ok(())
}

#[test]
fn weak_policy_detects_divergent_lifetimes() -> Result<()> {
    let builder = Snapgraph::builder().references(ReferencePolicy::WeakReference);
    let marker = Obj::new(Marker { id: 13 });

    let mut serializer = builder.serializer(Vec::new())?;
    serializer.serialize(&marker)?;
    serializer.serialize(&marker)?;
    let bytes = serializer.close()?;

    let mut deserializer = builder.deserializer(bytes.as_slice())?;
    let first: Obj<Marker> = deserializer.deserialize()?;
    drop(first);
    // The writer back-referenced an object this side no longer holds.
    let second: Result<Obj<Marker>> = deserializer.deserialize();
    assert!(matches!(second, Err(SnapError::StreamCorrupted(_))));
    Ok(())
}

#[derive(Default, SnapObject)]
struct Listy {
    xs: Vec<u64>,
}

#[test]
fn opaque_collections_refuse_traversal() -> Result<()> {
    let builder = Snapgraph::builder().opaque_collections(true);
    let root = Obj::new(Listy { xs: vec![1, 2] });
    let result = builder.to_vec(&root);
    assert!(matches!(result, Err(SnapError::Contract(_))));
    Ok(())
}

#[derive(Default, SnapObject)]
#[snap(pre_serialize = "normalize", post_deserialize = "recount")]
struct Ledger {
    entries: Vec<u64>,
    #[snap(skip)]
    total: u64,
}

impl Ledger {
    fn normalize(&mut self) {
        self.entries.sort_unstable();
    }

    fn recount(&mut self) {
        self.total = self.entries.iter().sum();
    }
}

#[test]
fn lifecycle_hooks_fire_on_both_sides() -> Result<()> {
    let ledger = Obj::new(Ledger {
        entries: vec![3, 1, 2],
        total: 0,
    });
    let bytes = Snapgraph::to_vec(&ledger)?;

    // The write-side hook ran on the emitted instance itself.
    assert_eq!(ledger.borrow().entries, vec![1, 2, 3]);

    let copy: Obj<Ledger> = Snapgraph::from_slice(&bytes)?;
    assert_eq!(copy.borrow().entries, vec![1, 2, 3]);
    assert_eq!(copy.borrow().total, 6, "rehydration hook recomputed the sum");
    Ok(())
}

#[derive(Default, SnapObject)]
#[snap(late_post_deserialize = "read_partner")]
struct Peer {
    value: u64,
    partner: Option<Obj<Peer>>,
    #[snap(skip)]
    partner_value: u64,
}

impl Peer {
    fn read_partner(&mut self) {
        if let Some(partner) = &self.partner {
            self.partner_value = partner.borrow().value;
        }
    }
}

#[test]
fn late_hooks_observe_the_fully_populated_graph() -> Result<()> {
    let a = Obj::new(Peer {
        value: 100,
        partner: None,
        partner_value: 0,
    });
    let b = Obj::new(Peer {
        value: 200,
        partner: Some(a.clone()),
        partner_value: 0,
    });
    a.borrow_mut().partner = Some(b);

    let bytes = Snapgraph::to_vec(&a)?;
    let a2: Obj<Peer> = Snapgraph::from_slice(&bytes)?;
    let b2 = a2.borrow().partner.clone().expect("cycle preserved");
    assert_eq!(a2.borrow().partner_value, 200);
    assert_eq!(b2.borrow().partner_value, 100);
    Ok(())
}

mod raw_ok {
    use super::*;

    #[derive(Default, SnapObject)]
    #[snap(raw_write = "dump", raw_read = "restore")]
    pub struct Sensor {
        pub samples: u64,
        #[snap(skip)]
        pub payload: Vec<u8>,
    }

    impl Sensor {
        fn dump(&self, wire: &mut dyn WireWrite) -> Result<()> {
            wire.put(&self.payload)
        }

        fn restore(&mut self, wire: &mut dyn WireRead) -> Result<()> {
            let mut buf = vec![0u8; self.samples as usize];
            wire.take(&mut buf)?;
            self.payload = buf;
            Ok(())
        }
    }
}

#[test]
fn raw_blocks_roundtrip() -> Result<()> {
    let sensor = Obj::new(raw_ok::Sensor {
        samples: 4,
        payload: vec![0xDE, 0xAD, 0xBE, 0xEF],
    });
    let bytes = Snapgraph::to_vec(&sensor)?;
    let copy: Obj<raw_ok::Sensor> = Snapgraph::from_slice(&bytes)?;
    assert_eq!(copy.borrow().payload, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    Ok(())
}

mod raw_short {
    use super::*;

    // Same identity and fields as `raw_ok::Sensor`, but its raw reader
    // consumes fewer bytes than were recorded.
    #[derive(Default, SnapObject)]
    #[snap(raw_write = "dump", raw_read = "restore")]
    pub struct Sensor {
        pub samples: u64,
        #[snap(skip)]
        pub payload: Vec<u8>,
    }

    impl Sensor {
        fn dump(&self, wire: &mut dyn WireWrite) -> Result<()> {
            wire.put(&self.payload)
        }

        fn restore(&mut self, wire: &mut dyn WireRead) -> Result<()> {
            let mut buf = vec![0u8; (self.samples / 2) as usize];
            wire.take(&mut buf)?;
            self.payload = buf;
            Ok(())
        }
    }
}

#[test]
fn raw_block_length_is_verified() -> Result<()> {
    let sensor = Obj::new(raw_ok::Sensor {
        samples: 4,
        payload: vec![1, 2, 3, 4],
    });
    let bytes = Snapgraph::builder().to_vec(&sensor)?;

    let result: Result<Obj<raw_short::Sensor>> = Snapgraph::builder().from_slice(&bytes);
    assert!(matches!(result, Err(SnapError::StreamCorrupted(_))));
    Ok(())
}

#[derive(Default, SnapObject)]
struct Secret {
    token: String,
}

#[derive(Default, SnapObject)]
struct Carrier {
    secret: Obj<Secret>,
}

#[test]
fn forbidden_types_never_reach_the_stream() -> Result<()> {
    let provider = Arc::new(TypeRegistry::new());
    provider.forbid::<Secret>();
    let builder = Snapgraph::builder().provider(provider);

    let carrier = Obj::new(Carrier {
        secret: Obj::new(Secret {
            token: "hunter2".into(),
        }),
    });
    let result = builder.to_vec(&carrier);
    assert!(matches!(result, Err(SnapError::Contract(_))));
    Ok(())
}

#[test]
fn save_and_load_through_a_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("graph.sgr");

    let marker = Obj::new(Marker { id: 77 });
    Snapgraph::save(&path, &marker)?;
    let copy: Obj<Marker> = Snapgraph::load(&path)?;
    assert_eq!(copy.borrow().id, 77);
    Ok(())
}
