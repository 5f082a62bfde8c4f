extern crate minuit;
extern crate ndarray;

use minuit::{with_ndata, Minuit, ParameterSet};
use ndarray::prelude::*;

/// Fits `y = a + b x` to five points with unit errors and prints the
/// parabolic and MINOS errors.
fn main() {
    let xs = [0.0, 1.0, 2.0, 3.0, 4.0];
    let ys = [1.3, 2.5, 5.2, 7.4, 8.6];
    let chi2 = move |p: ArrayView1<f64>| {
        xs.iter()
            .zip(ys.iter())
            .map(|(x, y)| (y - p[0] - p[1] * x).powi(2))
            .sum::<f64>()
    };

    let params = ParameterSet::from_values(&["a", "b"], &[0.0, 0.0], &[0.1, 0.1])
        .expect("valid parameters");
    let mut m = Minuit::new(with_ndata(chi2, xs.len()), params).expect("valid session");

    let fm = m.migrad(None).expect("free parameters");
    println!(
        "valid: {}, fval: {:.4}, edm: {:e}, nfcn: {}",
        fm.is_valid(),
        fm.fval(),
        fm.edm(),
        fm.nfcn()
    );
    m.hesse(None).expect("free parameters");

    for (i, name) in ["a", "b"].iter().enumerate() {
        let me = m.minos(*name, 1.0).expect("valid minimum");
        println!(
            "{} = {:.4} ± {:.4}  ({:+.4} {:+.4})",
            name,
            m.values()[i],
            m.errors()[i],
            me.lower(),
            me.upper()
        );
    }
    if let Some(cov) = m.covariance() {
        println!("correlation:\n{:.3}", cov.correlation());
    }
    println!("ndof: {:?}, chi2/ndof: {:.3}", m.ndof(), m.reduced_chi2());
}
