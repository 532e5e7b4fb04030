use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rollupdb::{Dims, Point, Scalar, Vals};

pub const DEFAULT_SEED: u64 = 0x_524F_4C4C_5550_4442; // fixed seed for stable benchmarks

/// Generates `points` points with `dim_count` string dimensions of bounded cardinality,
/// a numeric `status` dimension and two values.
pub fn generate_points(seed: u64, points: usize, dim_count: usize, cardinality: u32) -> Vec<Point> {
    assert!(cardinality > 0);

    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = Vec::with_capacity(points);

    for i in 0..points {
        let mut dims = Dims::new();
        for k in 0..dim_count {
            let v = rng.gen_range(0..cardinality);
            dims.insert(format!("d{}", k), Scalar::from(format!("v{}", v)));
        }
        let status = if rng.gen_bool(0.1) { 503 } else { 200 };
        dims.insert("status".into(), Scalar::from(status));

        let mut vals = Vals::new();
        vals.insert("requests".into(), 1.0);
        vals.insert("latency".into(), rng.gen::<u32>() as f64 * 0.001);

        out.push(Point {
            timestamp: 1_700_000_000_000_000_000 + i as u64 * 1_000_000,
            dims,
            vals,
        });
    }

    out
}
