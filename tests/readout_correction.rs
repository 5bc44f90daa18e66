//! Readout calibration: building the matrix from calibration circuits and
//! removing its bias before fitting.

use approx::assert_abs_diff_eq;
use ndarray::{Array1, Array2, array};
use proptest::prelude::*;
use qtomography::tomography::aggregate::aggregate;
use qtomography::tomography::{
    CalibrationMatrix, CorrectionMethod, FitterDataBuilder, MeasurementBasis, SdpFitter,
    state_configurations,
};
use qtomography::{Gate, QuantumState, Sampler};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn bell_state() -> QuantumState {
    let mut state = QuantumState::new(2);
    state.apply(&Gate::h(), &[0]).unwrap();
    state.apply_controlled(&Gate::x(), &[1], Some(&[0][..])).unwrap();
    state
}

/// P(read 1 | 0) = 0.25, P(read 0 | 1) = 0.1.
fn confusion() -> Array2<f64> {
    array![[0.75, 0.1], [0.25, 0.9]]
}

#[test]
fn calibration_circuits_reproduce_tensored_matrix() {
    let sampler = Sampler::new(100_000).exact().with_readout_error(confusion()).unwrap();
    let mut rng = StdRng::seed_from_u64(0);
    let measured =
        CalibrationMatrix::from_results(&sampler.sample_calibration(2, &mut rng), 2).unwrap();
    let expected = CalibrationMatrix::tensored(&[confusion(), confusion()]).unwrap();

    for (a, b) in measured.matrix().iter().zip(expected.matrix().iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-9);
    }
    assert_abs_diff_eq!(measured.readout_fidelity(), expected.readout_fidelity(), epsilon = 1e-9);
}

#[test]
fn readout_error_is_removed_before_fitting() {
    let bell = bell_state();
    let sampler = Sampler::new(100_000).with_readout_error(confusion()).unwrap();
    let mut rng = StdRng::seed_from_u64(2024);

    let configs = state_configurations(MeasurementBasis::Pauli, 2);
    let results = sampler.sample_state(&bell, &configs, &mut rng).unwrap();
    let data = FitterDataBuilder::new()
        .build(&aggregate(&results).unwrap())
        .unwrap();

    let fitter = SdpFitter::default();
    let raw = fitter.fit(&data).unwrap();
    let raw_fidelity = raw.fidelity(&bell.density_matrix).unwrap();
    assert!(raw_fidelity < 0.6, "uncorrected fidelity {raw_fidelity}");

    let calibration =
        CalibrationMatrix::from_results(&sampler.sample_calibration(2, &mut rng), 2).unwrap();
    let method = CorrectionMethod::try_from(1).unwrap();
    let corrected = calibration.correct(&data, method).unwrap();

    // every corrected sub-vector is a probability distribution
    for block in corrected.probabilities.exact_chunks(4) {
        assert!(block.iter().all(|&p| p >= 0.0));
        assert_abs_diff_eq!(block.sum(), 1.0, epsilon = 1e-8);
    }

    let fit = fitter.fit(&corrected).unwrap();
    assert!(fit.is_physical(1e-8));
    let fidelity = fit.fidelity(&bell.density_matrix).unwrap();
    assert!(fidelity > 0.98, "corrected fidelity {fidelity}");
}

#[test]
fn inverse_correction_round_trips_exact_data() {
    let bell = bell_state();
    let sampler = Sampler::new(1_000_000).exact().with_readout_error(confusion()).unwrap();
    let mut rng = StdRng::seed_from_u64(0);

    let configs = state_configurations(MeasurementBasis::Pauli, 2);
    let noisy = FitterDataBuilder::new()
        .build(&aggregate(&sampler.sample_state(&bell, &configs, &mut rng).unwrap()).unwrap())
        .unwrap();
    let clean = FitterDataBuilder::new()
        .build(
            &aggregate(
                &Sampler::new(1_000_000)
                    .exact()
                    .sample_state(&bell, &configs, &mut rng)
                    .unwrap(),
            )
            .unwrap(),
        )
        .unwrap();

    let calibration = CalibrationMatrix::tensored(&[confusion(), confusion()]).unwrap();
    let corrected = calibration.correct(&noisy, CorrectionMethod::Inverse).unwrap();
    for (a, b) in corrected.probabilities.iter().zip(clean.probabilities.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 2e-5);
    }
}

#[test]
fn identity_calibration_changes_nothing() {
    let bell = bell_state();
    let mut rng = StdRng::seed_from_u64(9);
    let configs = state_configurations(MeasurementBasis::Pauli, 2);
    let results = Sampler::new(500).sample_state(&bell, &configs, &mut rng).unwrap();
    let data = FitterDataBuilder::new()
        .build(&aggregate(&results).unwrap())
        .unwrap();

    let identity = CalibrationMatrix::identity(2);
    for method in [CorrectionMethod::Inverse, CorrectionMethod::ConstrainedLeastSquares] {
        let corrected = identity.correct(&data, method).unwrap();
        for (a, b) in corrected.probabilities.iter().zip(data.probabilities.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
        for (a, b) in corrected.weights.iter().zip(data.weights.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-6);
        }
    }
}

#[test]
fn single_histogram_correction() {
    let calibration = CalibrationMatrix::tensored(&[confusion()]).unwrap();
    let histogram = [("0", 750u64), ("1", 250)].into_iter().collect();
    let corrected = calibration
        .correct_histogram(&histogram, CorrectionMethod::Inverse)
        .unwrap();
    assert_abs_diff_eq!(corrected[0], 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(corrected[1], 0.0, epsilon = 1e-12);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Both methods undo any invertible readout error on a distribution,
    /// including matrices close to singular.
    #[test]
    fn correction_inverts_random_readout_error(
        flips in prop::collection::vec((0.52f64..1.0, 0.52f64..1.0), 1..=2),
        raw in prop::collection::vec(0.0f64..1.0, 4),
    ) {
        let per_qubit: Vec<Array2<f64>> = flips
            .iter()
            .map(|&(stay0, stay1)| array![[stay0, 1.0 - stay1], [1.0 - stay0, stay1]])
            .collect();
        let calibration = CalibrationMatrix::tensored(&per_qubit).unwrap();

        let dim = 1usize << per_qubit.len();
        let raw = Array1::from(raw[..dim].to_vec());
        prop_assume!(raw.sum() > 0.1);
        let truth = &raw / raw.sum();
        let measured = calibration.matrix().dot(&truth);

        for method in [CorrectionMethod::Inverse, CorrectionMethod::ConstrainedLeastSquares] {
            let corrected = calibration.apply(&measured, method).unwrap();
            for (a, b) in corrected.iter().zip(truth.iter()) {
                prop_assert!((a - b).abs() < 1e-8, "{:?}: {} vs {}", method, a, b);
            }
        }
    }
}
