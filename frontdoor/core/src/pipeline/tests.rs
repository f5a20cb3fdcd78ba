use super::*;

fn run() -> PipelineRun {
    PipelineRun::new(TriggerEvent::new("bundle.zip", TriggerKind::Created))
}

fn artifact(stage: Stage) -> Artifact {
    Artifact {
        stage,
        dir: PathBuf::from(format!("/work/{stage}")),
        files: vec![],
    }
}

#[test]
fn stages_run_in_order() {
    let mut run = run();
    assert_eq!(run.next_stage(), Some(Stage::Source));
    assert_eq!(run.outcome(), RunOutcome::Incomplete);

    assert_eq!(
        run.begin(Stage::Build),
        Err(PipelineError::Blocked {
            stage: Stage::Build,
            waiting_on: Stage::Source
        })
    );
    assert_eq!(
        run.begin(Stage::Deploy),
        Err(PipelineError::Blocked {
            stage: Stage::Deploy,
            waiting_on: Stage::Build
        })
    );

    assert_eq!(run.begin(Stage::Source), Ok(None));
    assert_eq!(run.next_stage(), None, "no stage may start while source runs");
    run.succeed(Stage::Source, Some(artifact(Stage::Source)))
        .unwrap();

    assert_eq!(run.next_stage(), Some(Stage::Build));
    assert_eq!(run.begin(Stage::Build), Ok(Some(artifact(Stage::Source))));
    assert_eq!(
        run.begin(Stage::Deploy),
        Err(PipelineError::Blocked {
            stage: Stage::Deploy,
            waiting_on: Stage::Build
        })
    );
    run.succeed(Stage::Build, Some(artifact(Stage::Build)))
        .unwrap();

    assert_eq!(run.begin(Stage::Deploy), Ok(Some(artifact(Stage::Build))));
    run.succeed(Stage::Deploy, None).unwrap();

    assert_eq!(run.next_stage(), None);
    assert_eq!(run.outcome(), RunOutcome::Succeeded);
    assert!(run.stages().iter().all(|s| s.attempts == 1));
}

#[test]
fn failure_blocks_later_stages() {
    let mut run = run();
    run.begin(Stage::Source).unwrap();
    run.succeed(Stage::Source, Some(artifact(Stage::Source)))
        .unwrap();
    run.begin(Stage::Build).unwrap();
    run.fail(Stage::Build, "docker build exited with 1").unwrap();

    assert_eq!(run.outcome(), RunOutcome::Failed(Stage::Build));
    assert_eq!(run.next_stage(), None);
    assert_eq!(run.status(Stage::Deploy), &StageStatus::Pending);
    assert_eq!(
        run.begin(Stage::Deploy),
        Err(PipelineError::Blocked {
            stage: Stage::Deploy,
            waiting_on: Stage::Build
        })
    );
    assert_eq!(run.begin(Stage::Build), Err(PipelineError::Completed(Stage::Build)));
}

#[test]
fn reset_resumes_from_prior_artifact() {
    let mut run = run();
    run.begin(Stage::Source).unwrap();
    run.succeed(Stage::Source, Some(artifact(Stage::Source)))
        .unwrap();
    run.begin(Stage::Build).unwrap();
    run.fail(Stage::Build, "boom").unwrap();

    run.reset_from(Stage::Build).unwrap();
    assert_eq!(run.outcome(), RunOutcome::Incomplete);
    assert_eq!(run.next_stage(), Some(Stage::Build));
    assert_eq!(run.begin(Stage::Build), Ok(Some(artifact(Stage::Source))));
    assert_eq!(run.stages()[Stage::Build as usize].attempts, 2);
    assert_eq!(run.stages()[Stage::Source as usize].attempts, 1);
}

#[test]
fn reset_requires_prior_success() {
    let mut run = run();
    assert_eq!(
        run.reset_from(Stage::Deploy),
        Err(PipelineError::Blocked {
            stage: Stage::Deploy,
            waiting_on: Stage::Build
        })
    );
    run.reset_from(Stage::Source).unwrap();
}

#[test]
fn reset_clears_interrupted_stage() {
    let mut run = run();
    run.begin(Stage::Source).unwrap();
    run.succeed(Stage::Source, Some(artifact(Stage::Source)))
        .unwrap();
    run.begin(Stage::Build).unwrap();
    assert_eq!(run.in_progress(), Some(Stage::Build));
    assert_eq!(run.next_stage(), None);

    run.reset_from(Stage::Build).unwrap();
    assert_eq!(run.in_progress(), None);
    assert_eq!(run.status(Stage::Build), &StageStatus::Pending);
    assert_eq!(run.next_stage(), Some(Stage::Build));

    run.begin(Stage::Build).unwrap();
    run.reset_from(Stage::Source).unwrap();
    assert_eq!(run.next_stage(), Some(Stage::Source));
}

#[test]
fn reset_of_succeeded_run_reruns_later_stages() {
    let mut run = run();
    for stage in Stage::ALL {
        run.begin(stage).unwrap();
        run.succeed(stage, Some(artifact(stage))).unwrap();
    }
    run.reset_from(Stage::Deploy).unwrap();
    assert_eq!(run.next_stage(), Some(Stage::Deploy));
    assert!(matches!(
        run.status(Stage::Build),
        StageStatus::Succeeded { .. }
    ));
}

#[test]
fn missing_artifact_is_an_error() {
    let mut run = run();
    run.begin(Stage::Source).unwrap();
    run.succeed(Stage::Source, None).unwrap();
    assert_eq!(
        run.begin(Stage::Build),
        Err(PipelineError::MissingArtifact(Stage::Source))
    );
}

#[test]
fn finishing_requires_in_progress() {
    let mut run = run();
    assert_eq!(
        run.succeed(Stage::Source, None),
        Err(PipelineError::NotInProgress(Stage::Source))
    );
    assert_eq!(
        run.fail(Stage::Deploy, "nope"),
        Err(PipelineError::NotInProgress(Stage::Deploy))
    );
}

#[test]
fn run_record_round_trips_through_json() {
    let mut run = run();
    run.begin(Stage::Source).unwrap();
    run.succeed(Stage::Source, Some(artifact(Stage::Source)))
        .unwrap();
    run.begin(Stage::Build).unwrap();
    run.fail(Stage::Build, "boom").unwrap();

    let json = serde_json::to_string(&run).unwrap();
    assert!(json.contains(r#""status":"failed""#), "{json}");
    let parsed: PipelineRun = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, run);
}

#[test]
fn stage_names() {
    for stage in Stage::ALL {
        assert_eq!(stage.as_str().parse::<Stage>(), Ok(stage));
    }
    assert!("test".parse::<Stage>().is_err());
    assert_eq!(Stage::Source.next(), Some(Stage::Build));
    assert_eq!(Stage::Deploy.next(), None);
}
