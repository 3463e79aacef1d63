use proptest::prelude::*;

use subtile_ir::OpKind;
use subtile_ir::conversion::ConversionConfig;
use subtile_ir::test::property::generators::arb_distributed_shape;

use crate::config::DistributeConfig;
use crate::distribute::distribute;
use crate::test::fixtures::{KernelMemory, copy_kernel, fully_distributed, loop_copy_kernel, ops_of, run_subgroups};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Running a distributed copy once per subgroup copies the whole workgroup tile.
    #[test]
    fn distributed_copy_moves_every_element((dist, shape) in arb_distributed_shape()) {
        let (mut graph, func) = copy_kernel(shape, dist);
        let config = DistributeConfig::builder().conversion(ConversionConfig::builder().verify(true).build()).build();
        distribute(&mut graph, &config).unwrap();
        prop_assert!(fully_distributed(&graph));

        let mut mem = KernelMemory::new(shape);
        run_subgroups(&graph, func, dist.grid[0] * dist.grid[1], &mut mem);
        prop_assert_eq!(mem.buffer(1), mem.buffer(0));
    }

    /// A loop carrying a counter and two tiles keeps one argument per subgroup tile and
    /// still copies everything.
    #[test]
    fn loop_carried_tiles_copy_every_element((dist, tile) in arb_distributed_shape(), steps in 1usize..=3) {
        let (mut graph, func) = loop_copy_kernel(tile, dist, steps);
        let config = DistributeConfig::builder().conversion(ConversionConfig::builder().verify(true).build()).build();
        distribute(&mut graph, &config).unwrap();

        let per_tile = (tile[0] / (dist.grid[0] * dist.tile[0])) * (tile[1] / (dist.grid[1] * dist.tile[1]));
        let for_op = ops_of(&graph, OpKind::For)[0];
        prop_assert_eq!(graph.results(for_op).len(), 1 + 2 * per_tile);

        let mut mem = KernelMemory::new([tile[0], tile[1] * steps]);
        run_subgroups(&graph, func, dist.grid[0] * dist.grid[1], &mut mem);
        prop_assert_eq!(mem.buffer(1), mem.buffer(0));
    }
}
