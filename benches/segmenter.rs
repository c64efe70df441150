use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use talkback::audio::stream::AudioChunk;
use talkback::audio::vad::{Vad, VadConfig};
use talkback::stt::segmenter::{SegmenterConfig, UtteranceSegmenter};

const SAMPLE_RATE: u32 = 16000;
const CHUNK: usize = 1600;

/// Alternating speech and pauses: 1.5 s tone, 1 s near-silence.
fn conversation_audio(seconds: usize) -> Vec<AudioChunk> {
    let chunks_per_second = SAMPLE_RATE as usize / CHUNK;
    (0..seconds * chunks_per_second)
        .map(|i| {
            let speaking = i % 25 < 15;
            let samples = (0..CHUNK)
                .map(|n| {
                    if speaking {
                        let phase = n as f32 * 440.0 * 2.0 * std::f32::consts::PI / SAMPLE_RATE as f32;
                        (phase.sin() * 8000.0) as i16
                    } else {
                        (n % 7) as i16 - 3
                    }
                })
                .collect();
            AudioChunk::new(i as u64, samples)
        })
        .collect()
}

fn bench_vad(c: &mut Criterion) {
    let audio = conversation_audio(10);
    let mut group = c.benchmark_group("vad");
    group.throughput(Throughput::Elements((audio.len() * CHUNK) as u64));
    group.bench_function("process", |b| {
        b.iter(|| {
            let mut vad = Vad::new(VadConfig::default());
            for chunk in &audio {
                black_box(vad.process(chunk.samples()));
            }
        })
    });
    group.finish();
}

fn bench_segmenter(c: &mut Criterion) {
    let mut group = c.benchmark_group("segmenter");
    for seconds in [10, 60] {
        let audio = conversation_audio(seconds);
        group.throughput(Throughput::Elements((audio.len() * CHUNK) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(seconds), &audio, |b, audio| {
            b.iter(|| {
                let mut segmenter = UtteranceSegmenter::new(SegmenterConfig::default());
                let mut events = 0;
                for chunk in audio {
                    events += segmenter.push(chunk).len();
                }
                black_box((events, segmenter.flush()))
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_vad, bench_segmenter);
criterion_main!(benches);
