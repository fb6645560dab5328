//! Version tolerance: reading streams written by a drifted schema.
//!
//! Each module below declares a struct under the same name, so both sides
//! stamp the same identity while disagreeing on structure. Writer and
//! reader use separate builders, as separate processes would.

use snapgraph::{
    Obj, Result, SnapError, SnapObject, Snapgraph, StampMode, VersionTolerance,
};

mod v1 {
    use super::*;

    #[derive(Default, SnapObject)]
    pub struct Config {
        pub alpha: u64,
        pub beta: String,
        pub gamma: i32,
    }
}

mod v2 {
    use super::*;

    // `beta` removed, `delta` added.
    #[derive(Default, SnapObject)]
    pub struct Config {
        pub alpha: u64,
        pub gamma: i32,
        pub delta: bool,
    }
}

mod v3 {
    use super::*;

    // `alpha` changed type.
    #[derive(Default, SnapObject)]
    pub struct Config {
        pub alpha: String,
        pub beta: String,
        pub gamma: i32,
    }
}

fn v1_stream() -> Result<Vec<u8>> {
    let root = Obj::new(v1::Config {
        alpha: 99,
        beta: "dropped".into(),
        gamma: -4,
    });
    Snapgraph::builder().to_vec(&root)
}

#[test]
fn tolerant_reader_absorbs_added_and_removed_fields() -> Result<()> {
    let bytes = v1_stream()?;
    let reader = Snapgraph::builder().tolerance(VersionTolerance::all());
    let copy: Obj<v2::Config> = reader.from_slice(&bytes)?;
    let copy = copy.borrow();
    assert_eq!(copy.alpha, 99);
    assert_eq!(copy.gamma, -4);
    assert!(!copy.delta, "locally added field keeps its default");
    Ok(())
}

#[test]
fn strict_reader_rejects_any_drift() -> Result<()> {
    let bytes = v1_stream()?;
    let result: Result<Obj<v2::Config>> = Snapgraph::builder().from_slice(&bytes);
    assert!(matches!(result, Err(SnapError::TypeStructureChanged(_))));
    Ok(())
}

#[test]
fn removal_alone_does_not_cover_addition() -> Result<()> {
    let bytes = v1_stream()?;
    let reader = Snapgraph::builder().tolerance(VersionTolerance::FIELD_REMOVAL);
    let result: Result<Obj<v2::Config>> = reader.from_slice(&bytes);
    assert!(matches!(result, Err(SnapError::TypeStructureChanged(_))));
    Ok(())
}

#[test]
fn changed_field_type_is_always_fatal() -> Result<()> {
    let bytes = v1_stream()?;
    let reader = Snapgraph::builder().tolerance(VersionTolerance::all());
    let result: Result<Obj<v3::Config>> = reader.from_slice(&bytes);
    assert!(matches!(result, Err(SnapError::TypeStructureChanged(_))));
    Ok(())
}

#[test]
fn identical_schema_roundtrips_under_any_tolerance() -> Result<()> {
    let bytes = v1_stream()?;
    for tolerance in [VersionTolerance::none(), VersionTolerance::all()] {
        let reader = Snapgraph::builder().tolerance(tolerance);
        let copy: Obj<v1::Config> = reader.from_slice(&bytes)?;
        assert_eq!(copy.borrow().beta, "dropped");
    }
    Ok(())
}

mod with_ref_v1 {
    use super::*;

    #[derive(Default, SnapObject)]
    pub struct Leaf {
        pub id: u64,
    }

    #[derive(Default, SnapObject)]
    pub struct Root {
        pub keep: u64,
        pub link: Option<Obj<Leaf>>,
    }
}

mod with_ref_v2 {
    use super::*;

    #[derive(Default, SnapObject)]
    pub struct Leaf {
        pub id: u64,
    }

    // `link` removed; the stream still carries the referenced object.
    #[derive(Default, SnapObject)]
    pub struct Root {
        pub keep: u64,
    }
}

#[test]
fn dropped_reference_field_still_consumes_its_entry() -> Result<()> {
    let root = Obj::new(with_ref_v1::Root {
        keep: 5,
        link: Some(Obj::new(with_ref_v1::Leaf { id: 77 })),
    });
    let bytes = Snapgraph::builder().to_vec(&root)?;

    // Leaf must still be known locally so the orphaned entry can be read.
    let provider = std::sync::Arc::new(snapgraph::TypeRegistry::new());
    provider.add_object_entry::<with_ref_v2::Leaf>()?;
    let reader = Snapgraph::builder()
        .tolerance(VersionTolerance::FIELD_REMOVAL)
        .provider(provider);
    let copy: Obj<with_ref_v2::Root> = reader.from_slice(&bytes)?;
    assert_eq!(copy.borrow().keep, 5);
    Ok(())
}

#[test]
fn simple_stamping_assumes_local_shape() -> Result<()> {
    let root = Obj::new(v1::Config {
        alpha: 1,
        beta: "x".into(),
        gamma: 2,
    });
    let builder = Snapgraph::builder().stamping(StampMode::Simple);
    let bytes = builder.to_vec(&root)?;
    let copy: Obj<v1::Config> = builder.from_slice(&bytes)?;
    assert_eq!(copy.borrow().alpha, 1);
    assert_eq!(copy.borrow().gamma, 2);
    Ok(())
}
