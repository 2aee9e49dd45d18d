use openrec_dl::{
    api::OpenrecSite,
    archive::ArchiveTracker,
    auth,
    cli::{self, Args},
    downloader::SegmentDownloader,
    ffmpeg::Ffmpeg,
    pipeline::Pipeline,
};

#[macro_use]
extern crate log;

#[tokio::main]
async fn main() {
    let args = cli::parse_args();

    let filter = if args.verbose {
        "warn,openrec_dl=debug"
    } else {
        "warn,openrec_dl=info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp(None)
        .format_target(false)
        .init();

    std::process::exit(run(args).await);
}

async fn run(args: Args) -> i32 {
    let options = args.options();

    if let Err(e) = tokio::fs::create_dir_all(&options.directory).await {
        error!(
            "[openrec] could not create directory '{}': {}",
            options.directory.display(),
            e
        );
        return 2;
    }

    let (client, session) = match auth::authenticate(&args.credentials()).await {
        Ok(v) => v,
        Err(e) => {
            error!("[auth] {}", e);
            return 2;
        }
    };
    if let Some(session) = &session {
        debug!("[auth] authenticated, premium: {}", session.is_premium);
    }

    let archive = match &args.download_archive {
        Some(path) => match ArchiveTracker::load(path).await {
            Ok(archive) => Some(archive),
            Err(e) => {
                error!("[archive] could not read '{}': {}", path.display(), e);
                return 2;
            }
        },
        None => None,
    };

    let site = OpenrecSite::new(&client, session.as_ref());
    let fetcher = SegmentDownloader::new(&client, args.concurrent_fragments);
    let converter = Ffmpeg::new(&args.ffmpeg_location);

    let mut pipeline = Pipeline::new(&site, &fetcher, &converter, &options, archive);
    let failures = pipeline.run(&args.references[..]).await;

    if let Some(remain) = site.daily_free_views_remaining() {
        info!("[auth] {} free view(s) left today", remain);
    }

    if failures > 0 {
        error!("[openrec] {} video(s) failed", failures);
        1
    } else {
        0
    }
}
