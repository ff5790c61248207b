use rollcall::{
    camera::Camera,
    cli,
    common::{system_clock, AttendanceError, Clock, Config, DevMode},
    core::{
        attendance::{CaptureEvent, EnrollmentOutcome},
        liveness::LivenessStep,
        slots::{twelve_hour, SlotSchedule},
        AttendanceOutcome, DirectAttendance, Enrollment, InstantAttendance, InstantStep,
        InstantWindow, ManualAttendance, QualityGate, Stage,
    },
    protocol::{AttendanceStatus, NewClass, NewTimetableSlot, Role, RosterEntry},
    service::{FaceApiClient, MemoryBackend, RecognitionService, RemoteDatabase, RestDatabase},
    session::{AuthProvider, RestAuthProvider, SessionContext, SignupDetails},
    storage::SessionStore,
};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "rollcall")]
#[command(about = "Face-verified class attendance")]
struct Cli {
    /// Enable development mode (offline backend and session under ./dev_data)
    #[arg(long, global = true)]
    dev: bool,

    /// Config file to use instead of the usual search path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Still image or directory of frames to use as the camera
    #[arg(long, global = true)]
    frames: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    Student,
    Teacher,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Student => Role::Student,
            RoleArg::Teacher => Role::Teacher,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
    Present,
    Absent,
    Late,
}

impl From<StatusArg> for AttendanceStatus {
    fn from(status: StatusArg) -> Self {
        match status {
            StatusArg::Present => AttendanceStatus::Present,
            StatusArg::Absent => AttendanceStatus::Absent,
            StatusArg::Late => AttendanceStatus::Late,
        }
    }
}

#[derive(clap::Args)]
struct ProfileArgs {
    #[arg(long)]
    name: String,
    #[arg(long, value_enum)]
    role: RoleArg,
    /// Required for students
    #[arg(long)]
    student_id: Option<String>,
    /// Teachers only
    #[arg(long)]
    subject: Option<String>,
}

impl From<ProfileArgs> for SignupDetails {
    fn from(args: ProfileArgs) -> Self {
        SignupDetails {
            name: args.name,
            role: args.role.into(),
            student_id: args.student_id,
            subject: args.subject,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account and its profile
    Signup {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
        #[command(flatten)]
        profile: ProfileArgs,
    },
    /// Sign in with email and password, or a provider token
    Login {
        #[arg(short, long, required_unless_present = "token")]
        email: Option<String>,
        #[arg(short, long, required_unless_present = "token")]
        password: Option<String>,
        /// Google ID token
        #[arg(long, conflicts_with_all = ["email", "password"])]
        token: Option<String>,
    },
    /// Finish the profile of an account that signed in without one
    CompleteProfile {
        #[command(flatten)]
        profile: ProfileArgs,
    },
    Logout,
    /// Show the signed-in profile
    Whoami,
    /// Set the profile photo from an image file
    Photo { image: PathBuf },
    /// Measure brightness and sharpness of an image
    Quality { image: PathBuf },
    /// Register your face with the recognition service
    Enroll,
    /// Show face enrollment status
    Enrollment,
    /// Delete your face enrollment
    Unenroll,
    /// List your classes
    Classes,
    /// List classes open for joining
    Browse,
    /// Request to join a class
    Join { class_id: i64 },
    /// Create a class (teachers)
    CreateClass {
        #[arg(long)]
        name: String,
        #[arg(long)]
        subject: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Delete one of your classes (teachers)
    DeleteClass { class_id: i64 },
    /// List a class's students and their membership status
    Roster { class_id: i64 },
    /// Approve a pending student (teachers)
    Approve { class_id: i64, student_id: i64 },
    /// Enroll every student whose ID falls in a range (teachers)
    AddRange {
        class_id: i64,
        start_student_id: String,
        end_student_id: String,
    },
    /// Mark attendance with face verification
    Attend { class_id: i64 },
    /// Mark attendance with the teacher's six-digit code
    Instant {
        #[arg(long)]
        code: Option<String>,
    },
    /// Show an instant attendance code until it expires (teachers)
    OpenWindow {
        class_id: i64,
        #[arg(long)]
        slot: u8,
    },
    /// Mark a student by hand (teachers)
    Mark {
        class_id: i64,
        /// Roster entry: database id, student ID or email
        student: String,
        #[arg(long)]
        slot: u8,
        #[arg(long, value_enum, default_value = "present")]
        status: StatusArg,
        /// YYYY-MM-DD, defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Attendance history
    History {
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Weekly timetable
    Timetable {
        #[command(subcommand)]
        action: Option<TimetableCommands>,
    },
    /// List every subject taught
    Subjects,
    /// Show the current slot and the day's periods
    Slot,
}

#[derive(Subcommand)]
enum TimetableCommands {
    /// Show your timetable
    Show,
    /// Put a class in a weekly slot (teachers)
    Add {
        class_id: i64,
        /// 1 = Monday .. 7 = Sunday
        #[arg(long)]
        day: u8,
        #[arg(long)]
        slot: u8,
    },
}

struct App {
    config: Config,
    db: Arc<dyn RemoteDatabase>,
    recognizer: Arc<dyn RecognitionService>,
    clock: Clock,
    session: SessionContext,
    store: SessionStore,
}

impl App {
    fn start(config: Config, dev_mode: &DevMode) -> Result<Self> {
        let db: Arc<dyn RemoteDatabase>;
        let recognizer: Arc<dyn RecognitionService>;
        let auth: Arc<dyn AuthProvider>;
        let clock: Clock;
        match dev_mode.backend_snapshot() {
            Some(snapshot) => {
                let schedule = SlotSchedule::campus(config.schedule.utc_offset_minutes);
                let backend = Arc::new(MemoryBackend::open(schedule, &snapshot)?);
                clock = backend.clock();
                db = backend.clone();
                recognizer = backend.clone();
                auth = backend;
            }
            None => {
                db = Arc::new(RestDatabase::new(&config.database)?);
                recognizer = Arc::new(FaceApiClient::new(&config.face_api)?);
                auth = Arc::new(RestAuthProvider::new(&config.auth)?);
                clock = system_clock();
            }
        }

        let store = SessionStore::new_with_dev_mode(dev_mode)?;
        let mut session = SessionContext::start(auth, db.clone())?;
        if session.identity().is_none() {
            if let Some(identity) = store.load()? {
                if let Err(e) = session.resume(identity) {
                    tracing::warn!("Saved session could not be resumed: {}", e);
                    store.clear()?;
                }
            }
        }

        Ok(Self {
            config,
            db,
            recognizer,
            clock,
            session,
            store,
        })
    }

    fn camera(&self) -> Result<Camera> {
        Ok(Camera::from_config(&self.config)?)
    }

    fn remember_identity(&self) -> Result<()> {
        if let Some(identity) = self.session.identity() {
            self.store.save(identity)?;
        }
        Ok(())
    }
}

/// Turn an error into the text shown for `stage`
fn friendly(stage: Stage) -> impl FnOnce(AttendanceError) -> anyhow::Error {
    move |err| {
        tracing::debug!("{:?} failed: {}", stage, err);
        anyhow::anyhow!(err.user_message(stage))
    }
}

fn print_capture_event(event: &CaptureEvent) {
    let text = cli::describe_capture_event(event);
    match event {
        CaptureEvent::Tick(progress) => {
            cli::show_status(&text);
            if progress.step == LivenessStep::Capture {
                println!("\n{}", cli::checklist(&progress.checks));
            }
        }
        CaptureEvent::Rejected { .. } => println!("\n{}", text),
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn find_roster_entry<'a>(roster: &'a [RosterEntry], needle: &str) -> Option<&'a RosterEntry> {
    roster.iter().find(|entry| {
        entry.id.to_string() == needle
            || entry.student_id.as_deref() == Some(needle)
            || entry.email.eq_ignore_ascii_case(needle)
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on mode
    setup_logging(cli.dev);

    // Create dev mode context
    let dev_mode = DevMode::new(cli.dev)?;

    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    if let Some(frames) = cli.frames {
        config.camera.source = Some(frames);
    }

    // Works without a backend
    if let Commands::Quality { image } = &cli.command {
        return check_quality(&config, image);
    }

    let mut app = App::start(config, &dev_mode)?;

    match cli.command {
        Commands::Signup { email, password, profile } => {
            let profile = app
                .session
                .signup(&email, &password, profile.into())
                .map_err(friendly(Stage::Session))?;
            app.remember_identity()?;
            println!("✅ Welcome, {}! Signed up as a {}.", profile.name, profile.role);
        }
        Commands::Login { email, password, token } => {
            let result = match token {
                Some(token) => app.session.login_with_token(&token),
                None => app.session.login(
                    email.as_deref().unwrap_or_default(),
                    password.as_deref().unwrap_or_default(),
                ),
            };
            match result {
                Ok(profile) => {
                    app.remember_identity()?;
                    println!("✅ Signed in as {} ({})", profile.name, profile.role);
                }
                Err(AttendanceError::ProfileIncomplete) => {
                    app.remember_identity()?;
                    println!("Signed in, but your profile is incomplete.");
                    println!("Run: rollcall complete-profile --name <NAME> --role <student|teacher>");
                }
                Err(e) => return Err(friendly(Stage::Session)(e)),
            }
        }
        Commands::CompleteProfile { profile } => {
            let profile = app
                .session
                .complete_profile(profile.into())
                .map_err(friendly(Stage::Session))?;
            println!("✅ Profile saved for {} ({})", profile.name, profile.role);
        }
        Commands::Logout => {
            app.session.logout()?;
            app.store.clear()?;
            println!("Signed out");
        }
        Commands::Whoami => match app.session.require_profile() {
            Ok(profile) => {
                println!("{} <{}>", profile.name, profile.email);
                println!("Role: {}", profile.role);
                if let Some(student_id) = &profile.student_id {
                    println!("Student ID: {}", student_id);
                }
                if let Some(subject) = &profile.subject {
                    println!("Subject: {}", subject);
                }
                if let Some(photo) = app.db.get_profile_photo(&profile.firebase_id)? {
                    println!("Photo: {}", photo);
                }
            }
            Err(AttendanceError::NotSignedIn) => println!("Not signed in"),
            Err(e) => return Err(friendly(Stage::Session)(e)),
        },
        Commands::Photo { image: path } => {
            let profile = app.session.require_profile().map_err(friendly(Stage::Session))?;
            let frame = image::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
            let url = app.db.save_profile_photo(&profile.firebase_id, &frame)?;
            println!("Profile photo saved: {}", url);
        }
        Commands::Quality { image } => check_quality(&app.config, &image)?,
        Commands::Enroll => {
            let student = app.session.require_student().map_err(friendly(Stage::Enrollment))?.clone();
            let mut enrollment = Enrollment::new(&app.config, app.recognizer.clone());
            let mut camera = app.camera()?;
            let mut session = camera.start_session()?;
            println!("Look at the camera. Using {}", session_label(&app));
            let outcome = enrollment
                .enroll_face(&student, &mut session, &mut print_capture_event)
                .map_err(friendly(Stage::Enrollment))?;
            println!();
            match outcome {
                EnrollmentOutcome::Enrolled { message } => println!("✅ {}", message),
                EnrollmentOutcome::CaptureRejected(verdict) => println!("❌ {}", verdict.instruction()),
                EnrollmentOutcome::Refused { message, details } => {
                    println!("❌ {}", message);
                    if let Some(details) = details {
                        tracing::debug!("Liveness details: {}", details);
                    }
                }
            }
        }
        Commands::Enrollment => {
            let student = app.session.require_student().map_err(friendly(Stage::Enrollment))?;
            let enrollment = Enrollment::new(&app.config, app.recognizer.clone());
            let status = enrollment.enrollment_status(student).map_err(friendly(Stage::Enrollment))?;
            if status.enrolled {
                match status.enrolled_at {
                    Some(at) => println!("Face enrolled on {}", at.format("%Y-%m-%d %H:%M UTC")),
                    None => println!("Face enrolled"),
                }
            } else {
                println!("No face enrolled. Run: rollcall enroll");
            }
        }
        Commands::Unenroll => {
            let student = app.session.require_student().map_err(friendly(Stage::Enrollment))?;
            let enrollment = Enrollment::new(&app.config, app.recognizer.clone());
            enrollment.remove_enrollment(student).map_err(friendly(Stage::Enrollment))?;
            println!("Face enrollment deleted");
        }
        Commands::Classes => {
            let profile = app.session.require_profile().map_err(friendly(Stage::Session))?;
            match profile.role {
                Role::Student => {
                    for class in app.db.get_classes_by_student(&profile.firebase_id)? {
                        println!(
                            "#{:<4} {} ({}) - {} [{:?}]",
                            class.id,
                            class.name,
                            class.subject,
                            class.teacher_name.as_deref().unwrap_or("Unknown teacher"),
                            class.status
                        );
                    }
                }
                Role::Teacher => {
                    for class in app.db.get_classes_by_teacher(&profile.firebase_id)? {
                        println!(
                            "#{:<4} {} ({}) - {} students",
                            class.id,
                            class.name,
                            class.subject,
                            class.student_count.unwrap_or(0)
                        );
                    }
                }
            }
        }
        Commands::Browse => {
            for class in app.db.get_available_classes()? {
                println!(
                    "#{:<4} {} ({}) - {}, {} enrolled",
                    class.id,
                    class.name,
                    class.subject,
                    class.teacher_name.as_deref().unwrap_or("Unknown teacher"),
                    class.enrolled_students
                );
            }
        }
        Commands::Join { class_id } => {
            let student = app.session.require_student().map_err(friendly(Stage::Session))?;
            let message = app.db.join_class(class_id, &student.firebase_id)?;
            println!("{}", message);
        }
        Commands::CreateClass { name, subject, description } => {
            let teacher = app.session.require_teacher().map_err(friendly(Stage::Session))?;
            let class = app.db.create_class(&NewClass {
                name,
                subject,
                description,
                teacher_firebase_id: teacher.firebase_id.clone(),
            })?;
            println!("Created class #{}: {}", class.id, class.name);
        }
        Commands::DeleteClass { class_id } => {
            let teacher = app.session.require_teacher().map_err(friendly(Stage::Session))?;
            app.db.delete_class(class_id, &teacher.firebase_id)?;
            println!("Deleted class #{}", class_id);
        }
        Commands::Roster { class_id } => {
            let teacher = app.session.require_teacher().map_err(friendly(Stage::ManualMark))?;
            let manual = ManualAttendance::new(&app.config, app.db.clone(), app.clock.clone());
            for entry in manual.roster(teacher, class_id).map_err(friendly(Stage::ManualMark))? {
                println!(
                    "#{:<4} {:<24} {:<12} {} [{:?}]",
                    entry.id,
                    entry.name,
                    entry.student_id.as_deref().unwrap_or("-"),
                    entry.email,
                    entry.status
                );
            }
        }
        Commands::Approve { class_id, student_id } => {
            let teacher = app.session.require_teacher().map_err(friendly(Stage::Session))?;
            app.db.approve_student(class_id, student_id, &teacher.firebase_id)?;
            println!("Approved student #{} in class #{}", student_id, class_id);
        }
        Commands::AddRange { class_id, start_student_id, end_student_id } => {
            let teacher = app.session.require_teacher().map_err(friendly(Stage::Session))?;
            let added = app.db.add_students_to_class(
                class_id,
                &start_student_id,
                &end_student_id,
                &teacher.firebase_id,
            )?;
            println!(
                "Added {} of {} eligible students to class #{}",
                added.added_count, added.total_eligible, class_id
            );
        }
        Commands::Attend { class_id } => {
            let student = app.session.require_student().map_err(friendly(Stage::DirectMark))?.clone();
            let mut direct =
                DirectAttendance::new(&app.config, app.db.clone(), app.recognizer.clone(), app.clock.clone());
            let mut camera = app.camera()?;
            let mut session = camera.start_session()?;
            let outcome = direct
                .mark(&student, class_id, &mut session, &mut print_capture_event)
                .map_err(friendly(Stage::DirectMark))?;
            println!();
            report_outcome(&outcome);
        }
        Commands::Instant { code } => {
            let student = app.session.require_student().map_err(friendly(Stage::PasswordValidation))?.clone();
            let mut instant = InstantAttendance::new(
                &app.config,
                app.db.clone(),
                app.recognizer.clone(),
                app.clock.clone(),
                &student,
            )
            .map_err(friendly(Stage::PasswordValidation))?;
            run_instant(&app, &mut instant, code)?;
        }
        Commands::OpenWindow { class_id, slot } => {
            let teacher = app.session.require_teacher().map_err(friendly(Stage::Session))?;
            let mut window = InstantWindow::open(app.db.clone(), app.clock.clone(), teacher, class_id, slot)
                .map_err(friendly(Stage::Session))?;
            let grant = window.grant().clone();
            cli::clear_screen().ok();
            println!(
                "Class: {}  Slot {}",
                grant.class_name.as_deref().unwrap_or("Unknown Class"),
                slot
            );
            println!("\n    Attendance code:  {}\n", window.code());
            println!("Press ESC or q to close the window early");

            crossterm::terminal::enable_raw_mode()
                .map_err(|e| anyhow::anyhow!("Failed to enable raw mode: {}", e))?;
            let result = window.run_countdown(&mut |display| {
                cli::show_status(&format!("Expires in {}", display));
                !cli::check_for_escape().unwrap_or(false)
            });
            if let Err(e) = crossterm::terminal::disable_raw_mode() {
                tracing::warn!("Failed to disable raw mode: {}", e);
            }
            println!();
            result?;
            window.close()?;
            println!("Code {} is no longer valid", grant.password);
        }
        Commands::Mark { class_id, student, slot, status, date } => {
            let teacher = app.session.require_teacher().map_err(friendly(Stage::ManualMark))?;
            let manual = ManualAttendance::new(&app.config, app.db.clone(), app.clock.clone());
            let roster = manual.roster(teacher, class_id).map_err(friendly(Stage::ManualMark))?;
            let Some(entry) = find_roster_entry(&roster, &student) else {
                bail!("No student matching '{}' in class #{}", student, class_id);
            };
            let receipt = manual
                .mark(teacher, class_id, entry, slot, status.into(), date)
                .map_err(friendly(Stage::ManualMark))?;
            println!(
                "✅ Marked {} {} for slot {}",
                receipt.student_name, receipt.status, receipt.slot_number
            );
        }
        Commands::History { from, to } => {
            let profile = app.session.require_profile().map_err(friendly(Stage::Session))?;
            let records = match profile.role {
                Role::Student => app.db.get_attendance_by_user(&profile.firebase_id, from, to)?,
                Role::Teacher => app.db.get_all_attendance(Some(&profile.firebase_id), from, to)?,
            };
            if records.is_empty() {
                println!("No attendance records");
            }
            for record in records {
                println!(
                    "{}  slot {}  {:<24} {:<8} {}",
                    record.attendance_date,
                    record.slot_number,
                    record.class_name.as_deref().unwrap_or("-"),
                    record.status,
                    record.marked_by.as_str()
                );
            }
        }
        Commands::Timetable { action } => {
            let profile = app.session.require_profile().map_err(friendly(Stage::Session))?;
            match action.unwrap_or(TimetableCommands::Show) {
                TimetableCommands::Show => {
                    let slots = match profile.role {
                        Role::Student => app.db.get_timetable_by_student(&profile.firebase_id)?,
                        Role::Teacher => app.db.get_timetable_by_teacher(&profile.firebase_id)?,
                    };
                    for slot in slots {
                        println!(
                            "{}  slot {}  {}-{}  {}",
                            weekday_label(slot.day_of_week),
                            slot.slot_number,
                            slot.start_time,
                            slot.end_time,
                            slot.class_label()
                        );
                    }
                }
                TimetableCommands::Add { class_id, day, slot } => {
                    let created = app.db.create_timetable(&NewTimetableSlot {
                        class_id,
                        day_of_week: day,
                        slot_number: slot,
                        teacher_firebase_id: profile.firebase_id.clone(),
                    })?;
                    println!(
                        "{} slot {} is now {}",
                        weekday_label(created.day_of_week),
                        created.slot_number,
                        created.class_label()
                    );
                }
            }
        }
        Commands::Subjects => {
            for subject in app.db.get_all_subjects()? {
                println!("{}", subject);
            }
        }
        Commands::Slot => {
            let schedule = SlotSchedule::campus(app.config.schedule.utc_offset_minutes);
            match app.recognizer.current_slot() {
                Ok(current) => {
                    println!("{} {}", current.current_time, current.timezone);
                    println!("{}", cli::slot_table(&schedule, current.current_slot));
                }
                Err(e) => {
                    tracing::warn!("Face service clock unavailable: {}", e);
                    let now = (app.clock)();
                    let local = schedule.local(now);
                    println!("{} (local clock)", twelve_hour(local.time()));
                    println!("{}", cli::slot_table(&schedule, schedule.current_slot(now)));
                }
            }
        }
    }

    Ok(())
}

fn check_quality(config: &Config, path: &Path) -> Result<()> {
    let frame = image::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let gate = QualityGate::from_config(&config.quality);
    let quality = gate.measure(&frame);
    println!("{}", quality.describe());
    println!("{}", gate.check(&quality).instruction());
    Ok(())
}

fn run_instant(app: &App, instant: &mut InstantAttendance, code: Option<String>) -> Result<()> {
    let mut code = code;
    loop {
        if matches!(instant.step(), InstantStep::PasswordEntry) {
            let input = match code.take() {
                Some(code) => code,
                None => prompt("Attendance code: ")?,
            };
            if input.is_empty() || input.eq_ignore_ascii_case("q") {
                return Ok(());
            }
            match instant.submit_password(&input, Instant::now()) {
                Ok(Some(validated)) => println!("Code accepted for {}", validated.class_name),
                Ok(None) => {
                    println!("Please wait a moment before trying again");
                    continue;
                }
                Err(e) => {
                    println!("❌ {}", e.user_message(Stage::PasswordValidation));
                    continue;
                }
            }
        }

        let mut camera = app.camera()?;
        let mut session = camera.start_session()?;
        match instant.capture_and_submit(&mut session, &mut print_capture_event) {
            Ok(Some(outcome)) => {
                println!();
                report_outcome(&outcome);
                if outcome.is_marked() {
                    return Ok(());
                }
            }
            Ok(None) => println!("\nPlease wait a moment before trying again"),
            Err(e) => println!("\n❌ {}", e.user_message(Stage::InstantMark)),
        }

        let again = prompt("Press Enter to try again, or q to quit: ")?;
        if again.eq_ignore_ascii_case("q") {
            return Ok(());
        }
    }
}

fn report_outcome(outcome: &AttendanceOutcome) {
    if outcome.is_marked() {
        println!("✅ {}", outcome.user_message());
    } else {
        println!("❌ {}", outcome.user_message());
    }
}

fn session_label(app: &App) -> String {
    app.config
        .camera
        .source
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "the default camera".to_string())
}

fn weekday_label(day: u8) -> &'static str {
    match day {
        1 => "Mon",
        2 => "Tue",
        3 => "Wed",
        4 => "Thu",
        5 => "Fri",
        6 => "Sat",
        7 => "Sun",
        _ => "???",
    }
}

fn setup_logging(dev_mode: bool) {
    if dev_mode {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_writer(io::stderr)
            .init();
    }
}
