use criterion::{Criterion, black_box, criterion_group, criterion_main};
use touchlink_core::{
    ContactClassifier, DETECTOR_SAMPLE_RATE_HZ, DetectionSample, ToneChannelConfig,
    synthesize_sine, tone_energy,
};

fn bench_tone_energy(c: &mut Criterion) {
    let config = ToneChannelConfig::for_period(12_274, 50);
    let mut block = vec![0.0; config.window_samples(DETECTOR_SAMPLE_RATE_HZ)];
    synthesize_sine(&mut block, 12_274.0, 0.2, DETECTOR_SAMPLE_RATE_HZ as f32, 0);
    synthesize_sine(&mut block, 14_643.0, 0.2, DETECTOR_SAMPLE_RATE_HZ as f32, 0);

    c.bench_function("tone_energy_25ms_window", |b| {
        b.iter(|| {
            tone_energy(
                black_box(&block),
                black_box(12_274.0),
                DETECTOR_SAMPLE_RATE_HZ as f32,
            )
        });
    });
}

fn bench_classify(c: &mut Criterion) {
    let classifier = ContactClassifier::new(0.01);
    let samples: Vec<DetectionSample> = (0..4)
        .map(|channel_id| DetectionSample {
            channel_id,
            energy: channel_id as f32 * 0.004,
        })
        .collect();

    c.bench_function("classify_four_channels", |b| {
        b.iter(|| classifier.classify(black_box(&samples)));
    });
}

criterion_group!(benches, bench_tone_energy, bench_classify);
criterion_main!(benches);
