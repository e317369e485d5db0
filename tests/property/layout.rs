// Property-based tests for Go type layout.
//
// Random Go types are generated as shape trees, interned into a fresh type
// table, then checked against the gc layout rules: fields sit at their
// natural alignment, sizes round up to the alignment, and the flattened
// scalar parts neither overlap nor escape the value.

use gocrane::codegen::types::{MAX_FLAT_PARTS, TypeLowering};
use gocrane::types::{BasicKind, Field, TypeId, TypeTable};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Shape {
    Basic(BasicKind),
    Pointer(Box<Shape>),
    Slice(Box<Shape>),
    Array(Box<Shape>, u64),
    Struct(Vec<Shape>),
    Iface,
}

fn shape() -> impl Strategy<Value = Shape> {
    let leaf = prop_oneof![
        proptest::sample::select(BasicKind::ALL.to_vec()).prop_map(Shape::Basic),
        Just(Shape::Iface),
    ];
    leaf.prop_recursive(4, 32, 5, |inner| {
        prop_oneof![
            inner.clone().prop_map(|s| Shape::Pointer(Box::new(s))),
            inner.clone().prop_map(|s| Shape::Slice(Box::new(s))),
            (inner.clone(), 0u64..4).prop_map(|(s, n)| Shape::Array(Box::new(s), n)),
            prop::collection::vec(inner, 0..5).prop_map(Shape::Struct),
        ]
    })
}

fn intern(table: &mut TypeTable, shape: &Shape) -> TypeId {
    match shape {
        Shape::Basic(kind) => table.basic(*kind),
        Shape::Pointer(elem) => {
            let elem = intern(table, elem);
            table.pointer(elem)
        }
        Shape::Slice(elem) => {
            let elem = intern(table, elem);
            table.slice(elem)
        }
        Shape::Array(elem, len) => {
            let elem = intern(table, elem);
            table.array(elem, *len)
        }
        Shape::Struct(fields) => {
            let fields = fields
                .iter()
                .enumerate()
                .map(|(i, f)| Field { name: format!("f{i}"), ty: intern(table, f), embedded: false })
                .collect();
            table.strukt(fields)
        }
        Shape::Iface => table.interface(vec![]),
    }
}

// =============================================================================
// Size and alignment
// =============================================================================

/// Property: size is a multiple of a power-of-two alignment.
#[test]
fn prop_size_is_multiple_of_align() {
    proptest!(|(s in shape())| {
        let mut table = TypeTable::new();
        let ty = intern(&mut table, &s);
        let lowering = TypeLowering::new(&table);
        let (size, align) = lowering.size_align(ty);
        prop_assert!(align.is_power_of_two(), "align {align}");
        prop_assert_eq!(size % align, 0);
    });
}

/// Property: record fields are aligned, in order, and inside the record.
#[test]
fn prop_record_offsets_are_aligned() {
    proptest!(|(fields in prop::collection::vec(shape(), 0..6))| {
        let mut table = TypeTable::new();
        let tys: Vec<TypeId> = fields.iter().map(|f| intern(&mut table, f)).collect();
        let lowering = TypeLowering::new(&table);
        let (size, align, offsets) = lowering.offsets(&tys);
        prop_assert_eq!(offsets.len(), tys.len());
        let mut end = 0;
        for (ty, off) in tys.iter().zip(&offsets) {
            let (field_size, field_align) = lowering.size_align(*ty);
            prop_assert_eq!(off % field_align, 0);
            prop_assert!(*off >= end);
            prop_assert!(field_align <= align);
            end = off + field_size;
        }
        prop_assert!(end <= size);
    });
}

// =============================================================================
// Flattening
// =============================================================================

/// Property: the flattened layout agrees with the cheap part count, and its
/// scalars are aligned, disjoint and inside the value.
#[test]
fn prop_flattened_scalars_fit() {
    proptest!(|(s in shape())| {
        let mut table = TypeTable::new();
        let ty = intern(&mut table, &s);
        let mut lowering = TypeLowering::new(&table);
        let parts = lowering.part_count(ty);
        let layout = lowering.layout(ty);
        if parts > MAX_FLAT_PARTS {
            prop_assert!(layout.is_err());
            return Ok(());
        }
        let layout = layout.unwrap();
        prop_assert_eq!(layout.parts(), parts);
        prop_assert_eq!((layout.size, layout.align), lowering.size_align(ty));

        let mut end = 0;
        for scalar in &layout.scalars {
            let bytes = u64::from(scalar.ty.bytes());
            prop_assert_eq!(scalar.offset % bytes, 0, "{:?} at {}", scalar.ty, scalar.offset);
            prop_assert!(scalar.offset >= end);
            end = scalar.offset + bytes;
        }
        prop_assert!(end <= layout.size);
    });
}

/// Property: a record's part ranges tile its flattened fields.
#[test]
fn prop_record_part_ranges_tile() {
    proptest!(|(fields in prop::collection::vec(shape(), 1..5))| {
        let mut table = TypeTable::new();
        let tys: Vec<TypeId> = fields.iter().map(|f| intern(&mut table, f)).collect();
        let mut lowering = TypeLowering::new(&table);
        let total: usize = tys.iter().map(|t| lowering.part_count(*t)).sum();
        prop_assume!(tys.iter().all(|t| lowering.part_count(*t) <= MAX_FLAT_PARTS));

        let record = lowering.record(&tys).unwrap();
        let mut next = 0;
        for i in 0..tys.len() {
            let range = record.part_range(i);
            prop_assert_eq!(range.start, next);
            next = range.end;
        }
        prop_assert_eq!(next, total);
    });
}
