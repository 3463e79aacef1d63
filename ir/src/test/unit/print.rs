use subtile_dtype::{AddrSpace, ScalarDType};

use crate::attr::{Attribute, CacheHint, names};
use crate::builder::{Builder, GraphBuilder};
use crate::types::{DistributionAttr, Order, TileType, VectorType};
use crate::{Attributes, Graph, Type};

#[test]
fn test_type_display() {
    let dist = DistributionAttr::new([4, 4], [64, 64]).with_order(Order::Swapped);
    let vector = Type::Vector(VectorType::new(vec![256, 256], ScalarDType::Float16).with_dist(dist));
    assert_eq!(vector.to_string(), "vector<256x256xf16, #dist<grid = [4, 4], tile = [64, 64], order = swapped>>");

    let scalable = Type::Vector(VectorType::scalable(vec![4, 8], ScalarDType::Float32, vec![false, true]));
    assert_eq!(scalable.to_string(), "vector<4x[8]xf32>");

    let tile = Type::Tile(TileType::new([8, 16], ScalarDType::Int8).with_scope(AddrSpace::Local));
    assert_eq!(tile.to_string(), "tile<8x16xi8, scope = slm>");
}

#[test]
fn test_op_line() {
    let mut graph = Graph::new();
    let mut b = GraphBuilder::new(&mut graph);
    let tile_ty = Type::Tile(TileType::new([8, 8], ScalarDType::Float32));
    let memref = b.alloc(crate::MemRefType::new(vec![8, 8], ScalarDType::Float32));
    let zero = b.index_const(0);
    let tile = b.init_tile(memref, &[zero, zero], tile_ty);
    let hints = Attributes::new().with(names::L1_HINT, Attribute::Hint(CacheHint::Cached));
    let loaded = b.load_tile(tile, Type::vector(vec![8, 8], ScalarDType::Float32), hints);

    let line = graph.op_to_string(graph.defining_op(loaded).unwrap());
    assert!(line.starts_with(&format!("{loaded} = load_tile {tile} {{l1_hint = #cached}}")), "{line}");
    assert!(line.ends_with("(tile<8x8xf32>) -> vector<8x8xf32>"), "{line}");
}

#[test]
fn test_graph_listing_nests_regions() {
    let mut graph = Graph::new();
    let mut builder = GraphBuilder::new(&mut graph);
    builder.func("kernel", vec![], |b, _| {
        b.barrier();
        vec![]
    });

    let text = graph.display().to_string();
    assert!(text.contains("func {sym_name = \"kernel\"}"), "{text}");
    assert!(text.contains("  barrier"), "{text}");
    assert!(text.contains("  return"), "{text}");

    let tree = graph.tree_string();
    assert!(tree.contains("func"), "{tree}");
    assert!(tree.contains("barrier"), "{tree}");
}
