use anyhow::Result;
use railsonic::audio_data::Sound;
use railsonic::*;
use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

const FRAME_TIME: f32 = 1.0 / 60.0;
const RUN_SECONDS: u32 = 8;
const CAR_COUNT: usize = 24;
const CAR_LENGTH: f32 = 20.0;
const TRAIN_SPEED: f32 = 25.0;

/// A car rolling along the x axis, 6 m beside the listener.
struct Car {
    position: Cell<Vec3>,
    velocity: Vec3,
}

impl Car {
    fn advance(&self, time_elapsed: f32) {
        self.position
            .set(self.position.get() + self.velocity * time_elapsed);
    }
}

impl SoundAnchor for Car {
    fn sound_type(&self) -> SoundType {
        SoundType::TrainCar
    }

    fn world_position(&self, offset: Vec3) -> Vec3 {
        self.position.get() + offset
    }

    fn velocity(&self) -> Vec3 {
        self.velocity
    }
}

/// Two seconds of a 110 Hz hum with a few harmonics.
fn motor_tone() -> Result<Arc<Sound>> {
    let sample_rate: u32 = 22050;
    let samples: Vec<f32> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let phase = std::f32::consts::TAU * 110.0 * t;
            0.5 * phase.sin() + 0.2 * (2.0 * phase).sin() + 0.1 * (3.0 * phase).sin()
        })
        .collect();
    Ok(Arc::new(Sound::from_f32_channels(sample_rate, &[samples])?))
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut engine = RailSonicEngine::new(EngineDesc::default().max_voices(16))?;
    if let Err(e) = engine.initialize() {
        log::warn!("Running without sound: {}", e);
    }

    let buffer = match args.get(1) {
        Some(path) => engine.register_buffer_path(path, 15.0),
        None => engine.register_buffer_raw(motor_tone()?, 15.0),
    };
    if let Some(duration) = engine.buffer_duration(buffer) {
        log::info!("Motor sound is {:.2} s long", duration.as_secs_f32());
    }

    let cars: Vec<Rc<Car>> = (0..CAR_COUNT)
        .map(|i| {
            Rc::new(Car {
                position: Cell::new(Vec3::new(-150.0 - i as f32 * CAR_LENGTH, 0.0, -6.0)),
                velocity: Vec3::new(TRAIN_SPEED, 0.0, 0.0),
            })
        })
        .collect();

    let mut motors: Vec<CarSound> = cars
        .iter()
        .map(|car| {
            let anchor: Rc<dyn SoundAnchor> = car.clone();
            CarSound::new(Some(buffer), Vec3::new(0.0, 0.5, 0.0), &anchor)
        })
        .collect();
    for (i, motor) in motors.iter_mut().enumerate() {
        let pitch = 0.9 + 0.02 * (i % 5) as f32;
        motor.play(&mut engine, pitch, 1.0, true)?;
    }

    engine.set_listener(Listener::new(Pose::from_position(Vec3::new(0.0, 1.5, 0.0))));

    let frames = RUN_SECONDS * 60;
    for frame in 0..frames {
        for car in &cars {
            car.advance(FRAME_TIME);
        }
        let stats = engine.update(FRAME_TIME, AttenuationModel::Inverse);

        if frame % 60 == 0 {
            log::info!(
                "t={}s buffers {}/{} loaded, sources {} ({} playing), voices {}/{}, stolen {}, clamp {:.2}",
                frame / 60,
                engine.loaded_buffer_count(),
                engine.registered_buffer_count(),
                engine.registered_source_count(),
                engine.playing_source_count(),
                engine.bound_voice_count(),
                engine.system_max_sounds(),
                stats.voices_stolen,
                engine.log_clamp_factor()
            );
        }

        // the last car drops its sound half way through
        if frame == frames / 2 {
            if let Some(motor) = motors.last_mut() {
                motor.stop(&mut engine);
            }
        }

        std::thread::sleep(Duration::from_secs_f32(FRAME_TIME));
    }

    engine.stop_all_sounds();
    engine.update(FRAME_TIME, AttenuationModel::Inverse);
    log::info!(
        "Finished with {} sources left",
        engine.registered_source_count()
    );
    engine.deinitialize();

    Ok(())
}
