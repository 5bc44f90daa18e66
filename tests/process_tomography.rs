//! End-to-end process tomography of single- and two-qubit channels.

use approx::assert_abs_diff_eq;
use qtomography::tomography::aggregate::aggregate;
use qtomography::tomography::{
    BasisMatrixCache, FitterData, FitterDataBuilder, LstsqFitter, MeasurementBasis,
    PreparationBasis, SdpFitter, SdpOptions, TomographyTarget, process_configurations,
};
use qtomography::{Gate, QuantumChannel, Sampler};
use rand::SeedableRng;
use rand::rngs::StdRng;

fn fitter_data(
    sampler: &Sampler,
    channel: &QuantumChannel,
    preparation: PreparationBasis,
    seed: u64,
) -> FitterData {
    let n = channel.num_qubits;
    let configs = process_configurations(preparation, n, MeasurementBasis::Pauli, n);
    let mut rng = StdRng::seed_from_u64(seed);
    let results = sampler.sample_process(channel, &configs, &mut rng).unwrap();
    FitterDataBuilder::new()
        .with_preparation_basis(preparation)
        .build(&aggregate(&results).unwrap())
        .unwrap()
}

#[test]
fn hadamard_process() {
    let hadamard = QuantumChannel::from_unitary(&Gate::h());
    let data = fitter_data(&Sampler::new(4000), &hadamard, PreparationBasis::Pauli, 11);
    assert_eq!(
        data.target,
        TomographyTarget::Process {
            input_qubits: 1,
            output_qubits: 1
        }
    );
    assert_eq!(data.len(), 4 * 3 * 2);

    let sdp = SdpFitter::default().fit(&data).unwrap();
    assert!(sdp.is_physical(1e-8));
    assert!(sdp.is_trace_preserving(1e-4));
    assert_abs_diff_eq!(sdp.trace(), 2.0, epsilon = 1e-9);
    let fidelity = sdp.process_fidelity(&hadamard).unwrap();
    assert!(fidelity >= 0.999, "constrained fidelity {fidelity}");

    let lstsq = LstsqFitter::default().fit(&data).unwrap();
    assert!(lstsq.is_physical(1e-8));
    assert_abs_diff_eq!(lstsq.trace(), 2.0, epsilon = 1e-9);
    let fidelity = lstsq.process_fidelity(&hadamard).unwrap();
    assert!(fidelity >= 0.995, "least-squares fidelity {fidelity}");
}

#[test]
fn sic_preparations_identify_the_channel() {
    let channel = QuantumChannel::from_unitary(&Gate::s());
    let data = fitter_data(&Sampler::new(1_000_000).exact(), &channel, PreparationBasis::Sic, 0);
    assert_eq!(data.configurations.len(), 4 * 3);

    for fit in [
        LstsqFitter::default().fit(&data).unwrap(),
        SdpFitter::default().fit(&data).unwrap(),
    ] {
        let fidelity = fit.process_fidelity(&channel).unwrap();
        assert!(fidelity >= 1.0 - 1e-4, "fidelity {fidelity}");
    }
}

#[test]
fn depolarizing_choi_matrix_is_recovered() {
    let channel = QuantumChannel::depolarizing(0.3).unwrap();
    let data = fitter_data(&Sampler::new(1_000_000).exact(), &channel, PreparationBasis::Pauli, 0);
    let expected = channel.choi();

    for fit in [
        LstsqFitter::default().fit(&data).unwrap(),
        SdpFitter::default().fit(&data).unwrap(),
    ] {
        for (got, want) in fit.matrix.iter().zip(expected.iter()) {
            assert_abs_diff_eq!((got - want).norm(), 0.0, epsilon = 1e-4);
        }
    }
}

#[test]
fn noiseless_amplitude_damping_with_and_without_trace_preservation() {
    let channel = QuantumChannel::amplitude_damping(0.25).unwrap();
    let data = fitter_data(&Sampler::new(1_000_000).exact(), &channel, PreparationBasis::Pauli, 0);

    for trace_preserving in [true, false] {
        let fit = SdpFitter::new(SdpOptions::default().with_trace_preserving(trace_preserving))
            .fit(&data)
            .unwrap();
        assert!(fit.is_physical(1e-8));
        assert_abs_diff_eq!(fit.trace(), 2.0, epsilon = 1e-9);
        assert!(fit.is_trace_preserving(1e-3));
        let fidelity = fit.fidelity(&channel.choi()).unwrap();
        assert!(
            fidelity >= 1.0 - 1e-5,
            "trace_preserving={trace_preserving}: fidelity {fidelity}"
        );
    }
}

#[test]
fn cnot_process_respects_qubit_order() {
    let cnot = QuantumChannel::from_unitary(&Gate::cnot());
    let data = fitter_data(&Sampler::new(1_000_000).exact(), &cnot, PreparationBasis::Pauli, 0);
    assert_eq!(data.configurations.len(), 16 * 9);

    let fit = LstsqFitter::default().fit(&data).unwrap();
    assert_abs_diff_eq!(fit.trace(), 4.0, epsilon = 1e-9);
    let fidelity = fit.process_fidelity(&cnot).unwrap();
    assert!(fidelity >= 1.0 - 1e-4, "fidelity {fidelity}");

    // A CNOT with control and target swapped is a different process.
    let swapped = QuantumChannel::new(vec![
        qtomography::utils::expand_operator(2, &Gate::x().matrix, &[0], &[1]),
    ])
    .unwrap();
    assert!(fit.process_fidelity(&swapped).unwrap() < 0.5);
}

#[test]
fn repeated_experiments_share_the_basis_matrix() {
    let channel = QuantumChannel::from_unitary(&Gate::x());
    let configs = process_configurations(PreparationBasis::Pauli, 1, MeasurementBasis::Pauli, 1);
    let builder = FitterDataBuilder::new();
    let mut cache = BasisMatrixCache::new();
    let mut rng = StdRng::seed_from_u64(5);

    let mut fidelities = Vec::new();
    for _ in 0..3 {
        let results = Sampler::new(2000).sample_process(&channel, &configs, &mut rng).unwrap();
        let data = builder
            .build_cached(&aggregate(&results).unwrap(), &mut cache)
            .unwrap();
        let fit = SdpFitter::default().fit(&data).unwrap();
        fidelities.push(fit.process_fidelity(&channel).unwrap());
    }
    assert_eq!(cache.len(), 1);
    assert!(fidelities.iter().all(|&f| f > 0.99), "{fidelities:?}");
}
