//! Terminal frontend: onboarding prompts, transcript rendering, and the
//! command loop.
//!
//! Stdout carries the conversation only; tracing goes to stderr so logs
//! never interleave with the transcript. Commands are newline-delimited:
//!
//! ```text
//! mic              toggle the live conversation on/off
//! imagen [tema]    illustrate the mentor's last answer (default: your last question)
//! fin              end the current topic
//! reinicio         wipe the conversation and return to onboarding
//! salir            quit
//! ```

use crate::audio::codec;
use crate::audio::{PlaybackEvent, PlaybackSink};
use crate::config::MentorConfig;
use crate::coordinator::{ConversationEvent, Coordinator};
use crate::error::Result;
use crate::genai::GenAiClient;
use crate::profile::{END_TOPIC_LINE, Grade, StudentProfile, TTS_ERROR_LINE};
use crate::transcript::{Message, Sender};
use std::collections::HashSet;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// What the command loop decided.
enum Flow {
    Continue,
    /// Wipe everything and return to onboarding.
    Reset,
    Quit,
}

/// The interactive tutoring application.
pub struct App {
    config: MentorConfig,
    genai: GenAiClient,
    coordinator: Coordinator,
    profile: StudentProfile,
    /// Message ids already printed as final lines.
    printed: HashSet<String>,
    /// Message ids whose attached image was already announced.
    announced_images: HashSet<String>,
}

impl App {
    /// Build the app from config. Resolves the API key eagerly so a missing
    /// credential fails before onboarding starts.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key cannot be resolved.
    pub fn new(config: MentorConfig) -> Result<Self> {
        let api_key = config.api_key.resolve()?;
        let genai = GenAiClient::new(config.tts.clone(), config.image.clone(), api_key);
        let coordinator = Coordinator::new(config.clone());
        Ok(Self {
            config,
            genai,
            coordinator,
            profile: StudentProfile::default(),
            printed: HashSet::new(),
            announced_images: HashSet::new(),
        })
    }

    /// Run onboarding then the interactive loop until `salir`, Ctrl+C, or
    /// EOF. `reinicio` loops back to onboarding with a fresh profile.
    ///
    /// # Errors
    ///
    /// Returns an error on stdin/stdout I/O failure.
    pub async fn run(&mut self) -> Result<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();

        println!("MentorIA — tu tutor de voz\n");

        loop {
            self.profile = match onboard(&mut lines).await? {
                Some(p) => p,
                None => break,
            };

            let intro = self.profile.intro_line();
            self.coordinator.push_mentor_line(&intro);
            self.render();
            self.speak_line(&intro).await;

            println!("\nComandos: mic | imagen [tema] | fin | reinicio | salir\n");

            match self.command_loop(&mut lines).await? {
                Flow::Reset => {
                    self.coordinator.reset();
                    self.printed.clear();
                    self.announced_images.clear();
                    println!("\n--- reinicio ---\n");
                }
                Flow::Quit | Flow::Continue => break,
            }
        }

        self.coordinator.stop();
        info!("session ended");
        Ok(())
    }

    /// Read commands and render conversation updates until quit or reset.
    async fn command_loop(&mut self, lines: &mut Lines<BufReader<Stdin>>) -> Result<Flow> {
        let mut events = self.coordinator.subscribe();
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("received Ctrl+C, shutting down...");
                    return Ok(Flow::Quit);
                }
                line = lines.next_line() => {
                    match line? {
                        Some(line) => match self.handle_command(line.trim()).await? {
                            Flow::Continue => {}
                            flow => return Ok(flow),
                        },
                        None => return Ok(Flow::Quit),
                    }
                }
                ev = events.recv() => {
                    match ev {
                        Ok(ConversationEvent::TranscriptChanged) => self.render(),
                        Ok(ConversationEvent::ListeningChanged(on)) => {
                            println!("[micrófono {}]", if on { "activo" } else { "apagado" });
                        }
                        Ok(ConversationEvent::SpeakingChanged(_)) | Err(_) => {}
                    }
                }
            }
        }
    }

    /// Dispatch one command line.
    async fn handle_command(&mut self, line: &str) -> Result<Flow> {
        let (cmd, rest) = match line.split_once(char::is_whitespace) {
            Some((c, r)) => (c, r.trim()),
            None => (line, ""),
        };

        match cmd {
            "" => {}
            "mic" => {
                if self.coordinator.is_listening() {
                    self.coordinator.stop();
                } else {
                    self.coordinator.start(&self.profile)?;
                    self.render();
                }
            }
            "imagen" => self.illustrate(rest).await,
            "fin" => {
                self.coordinator.stop();
                self.coordinator.push_mentor_line(END_TOPIC_LINE);
                self.render();
                self.speak_line(END_TOPIC_LINE).await;
            }
            "reinicio" => return Ok(Flow::Reset),
            "salir" => return Ok(Flow::Quit),
            other => println!("comando desconocido: {other}"),
        }
        Ok(Flow::Continue)
    }

    /// Generate an illustration for the mentor's last answer.
    ///
    /// Uses the given topic, falling back to the student's last finalized
    /// question. Failure is absorbed: the progress flag is reverted and the
    /// conversation continues untouched.
    async fn illustrate(&mut self, topic: &str) {
        let Some(target_id) = self.coordinator.last_mentor_id() else {
            println!("(aún no hay respuesta del mentor que ilustrar)");
            return;
        };
        let prompt = if topic.is_empty() {
            match self.coordinator.last_final_user_text() {
                Some(text) => text,
                None => {
                    println!("(dime el tema: imagen <tema>)");
                    return;
                }
            }
        } else {
            topic.to_owned()
        };

        self.coordinator.begin_image(&target_id);
        println!("(generando imagen...)");

        match self.genai.generate_image(&prompt).await {
            Ok(url) => {
                self.coordinator.attach_image(&target_id, url);
                self.render();
            }
            Err(e) => {
                debug!("image generation failed: {e}");
                self.coordinator.abort_image(&target_id);
            }
        }
    }

    /// Speak one scripted line through a transient playback stream.
    ///
    /// Used outside the live session (intro, end-of-topic). Awaited to
    /// completion, so no command can toggle the microphone mid-line. On
    /// synthesis failure a mentor error line lands in the transcript.
    async fn speak_line(&mut self, text: &str) {
        let audio_b64 = match self.genai.text_to_speech(text).await {
            Ok(b64) => b64,
            Err(e) => {
                warn!("speech synthesis failed: {e}");
                self.coordinator.push_mentor_line(TTS_ERROR_LINE);
                self.render();
                return;
            }
        };

        let samples = match codec::decode(&audio_b64).and_then(|b| codec::decode_pcm16(&b)) {
            Ok(s) => s,
            Err(e) => {
                warn!("undecodable synthesis payload: {e}");
                return;
            }
        };
        if samples.is_empty() {
            return;
        }

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<PlaybackEvent>();
        let mut sink = match PlaybackSink::spawn(&self.config.audio, event_tx) {
            Ok(s) => s,
            Err(e) => {
                warn!("playback unavailable: {e}");
                return;
            }
        };

        sink.enqueue(&samples);
        // Wait for the queue to drain, then release the device.
        let _ = event_rx.recv().await;
        sink.shutdown();
    }

    /// Print transcript messages that reached their final form.
    ///
    /// Streaming fragments are skipped; a message is printed exactly once,
    /// when finalized. Attached images are announced separately.
    fn render(&mut self) {
        for msg in self.coordinator.snapshot() {
            if msg.is_final && !self.printed.contains(&msg.id) {
                self.printed.insert(msg.id.clone());
                print_message(&msg);
            }
            if msg.image_url.is_some() && !self.announced_images.contains(&msg.id) {
                self.announced_images.insert(msg.id.clone());
                println!("  [imagen adjunta]");
            }
        }
        let _ = std::io::stdout().flush();
    }
}

fn print_message(msg: &Message) {
    let who = match msg.sender {
        Sender::User => "Tú",
        Sender::Mentor => "Mentor",
    };
    println!("{who}: {}", msg.text);
}

/// Prompt for name, grade, and interests. Returns `None` on EOF.
async fn onboard(lines: &mut Lines<BufReader<Stdin>>) -> Result<Option<StudentProfile>> {
    let name = loop {
        let Some(answer) = prompt(lines, "¿Cómo te llamas?").await? else {
            return Ok(None);
        };
        if !answer.is_empty() {
            break answer;
        }
    };

    let grade = loop {
        let Some(answer) =
            prompt(lines, "¿En qué grado vas? (1, 2 o 3 de secundaria)").await?
        else {
            return Ok(None);
        };
        if let Some(grade) = answer.parse::<u8>().ok().and_then(Grade::from_choice) {
            break grade;
        }
        println!("Elige 1, 2 o 3.");
    };

    let interests = loop {
        let Some(answer) =
            prompt(lines, "¿Qué te gusta? (películas, juegos, series...)").await?
        else {
            return Ok(None);
        };
        if !answer.is_empty() {
            break answer;
        }
    };

    Ok(Some(StudentProfile {
        name,
        grade,
        interests,
    }))
}

async fn prompt(
    lines: &mut Lines<BufReader<Stdin>>,
    question: &str,
) -> Result<Option<String>> {
    print!("{question} ");
    std::io::stdout().flush()?;
    Ok(lines.next_line().await?.map(|l| l.trim().to_owned()))
}
