//! Hidflash command line interface.

use std::io::{self, Read};
use std::process;
use std::time::Duration;

use clap::{
    crate_authors, crate_description, crate_name, crate_version, value_t, App, AppSettings::*, Arg,
    ArgMatches, SubCommand,
};
use console::style;
use log::{debug, trace, LevelFilter};
use simplelog::*;

use hidflash::{
    self as hf, AddressUnit, Device, DeviceMode, FlashImage, HidApiTransport, Settings, WireFormat,
};

fn main() {
    println!("[HF] hidflash v{}", crate_version!());

    let matches = App::new(crate_name!())
        .version(format!("v{}", crate_version!()).as_str())
        .author(crate_authors!())
        .about(crate_description!())
        .long_about(
            "\n\
            Hidflash talks to a USB HID device that carries an application \
            firmware and a bootloader firmware. Without a subcommand, it \
            prints the mode the device is currently in.\n\
            \n\
            Switching mode makes the device reboot: it disappears from the \
            bus and comes back under another product ID. Hidflash waits for \
            it to settle, finds it again and checks that it is in the \
            requested mode.\n\
            \n\
            Flashing an image goes through the following steps: \n\
               \t* reads and checks the Intel HEX image \n\
               \t* switches the device to the bootloader \n\
               \t* writes the image, one 128-byte page at a time \n\
               \t* switches the device back to the application \n\
            \n\
            Only one such device may be connected at a time.\
        ",
        )
        .max_term_width(80)
        .setting(ColoredHelp)
        .setting(NextLineHelp)
        .setting(VersionlessSubcommands)
        .arg(
            Arg::with_name("REPORT_ID")
                .help("report ID of the enter-bootloader report")
                .long_help(
                    "report ID of the enter-bootloader report, as a decimal \
                     or `0x` prefixed hexadecimal number; current firmware \
                     uses 0x08, early firmware uses 0x01.",
                )
                .long("--report-id")
                .takes_value(true)
                .require_equals(true)
                .validator(|value| parse_number(&value).and_then(report_id).map(|_| ())),
        )
        .arg(
            Arg::with_name("ADDRESS_UNIT")
                .help("unit of the page address sent to the bootloader")
                .long("--address-unit")
                .takes_value(true)
                .possible_values(&["bytes", "words"])
                .require_equals(true),
        )
        .arg(
            Arg::with_name("LEGACY")
                .help("talk to an early firmware (report ID 0x01, word addresses)")
                .long_help(
                    "talk to an early firmware (report ID 0x01, word \
                     addresses); `--report-id` and `--address-unit` still \
                     take precedence.",
                )
                .long("--legacy"),
        )
        .arg(
            Arg::with_name("SETTLE_MS")
                .help("milliseconds to wait for the device after a mode change")
                .long("--settle-ms")
                .takes_value(true)
                .default_value("1000")
                .require_equals(true)
                .validator(|value| parse_number(&value).map(|_| ())),
        )
        .arg(
            Arg::with_name("RETRIES")
                .help("extra attempts at finding the device after a mode change")
                .long("--retries")
                .takes_value(true)
                .default_value("0")
                .require_equals(true)
                .validator(|value| parse_number(&value).map(|_| ())),
        )
        .arg(
            Arg::with_name("FLASH_SIZE")
                .help("flash capacity images are checked against, 0 to disable")
                .long("--flash-size")
                .takes_value(true)
                .default_value("8192")
                .require_equals(true)
                .validator(|value| parse_number(&value).map(|_| ())),
        )
        .arg(Arg::with_name("v").short("v").multiple(true).help(
            "Sets the logging level of verbosity, repeat several times for \
                higher verbosity",
        ))
        .subcommand(
            SubCommand::with_name("mode")
                .about("switches the device to the given mode")
                .arg(
                    Arg::with_name("MODE")
                        .help("the mode to switch to")
                        .possible_values(&["app", "application", "bootloader", "boot"])
                        .required(true)
                        .index(1),
                ),
        )
        .subcommand(
            SubCommand::with_name("flash")
                .about("flashes a firmware image and restarts the application")
                .arg(
                    Arg::with_name("IMAGE")
                        .help("path to the Intel HEX image, `-` for stdin")
                        .required(true)
                        .index(1),
                ),
        )
        .get_matches();

    // Vary the output based on how many times the user used the "verbose" flag
    // (i.e. 'hidflash -v -v -v' or 'hidflash -vvv' vs 'hidflash -v'
    let log_level = match matches.occurrences_of("v") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .unwrap();

    trace!("{:#?}", matches);

    let settings = settings_from(&matches);
    debug!("{:#?}", settings);

    if let Err(err) = run(&matches, settings) {
        println!("{}: {}", style("error").red(), err);
        process::exit(1);
    }
}

/// Builds the settings from the command line.
fn settings_from(matches: &ArgMatches<'_>) -> Settings {
    // It's safe to unwrap numeric arguments, they went through the validator
    // and the ones without default values are only read when present.
    let number = |name: &str| parse_number(matches.value_of(name).unwrap()).unwrap();

    let mut builder = hf::SettingsBuilder::new()
        .settle_delay(Duration::from_millis(u64::from(number("SETTLE_MS"))))
        .rediscover_attempts(number("RETRIES") as usize)
        .flash_size(match number("FLASH_SIZE") {
            0 => None,
            size => Some(size),
        });

    if matches.is_present("LEGACY") {
        builder = builder.wire_format(WireFormat::LEGACY);
    }
    if matches.is_present("REPORT_ID") {
        let id = parse_number(matches.value_of("REPORT_ID").unwrap()).and_then(report_id);
        builder = builder.enter_bootloader_report_id(id.unwrap());
    }
    if matches.is_present("ADDRESS_UNIT") {
        let unit = value_t!(matches, "ADDRESS_UNIT", AddressUnit).unwrap_or_else(|e| e.exit());
        builder = builder.address_unit(unit);
    }

    builder.finalize()
}

fn run(matches: &ArgMatches<'_>, settings: Settings) -> hf::Result<()> {
    // A bad image is reported before the device is touched.
    let image = match matches.subcommand() {
        ("flash", Some(sub)) => Some(load_image(sub.value_of("IMAGE").unwrap_or("-"))?),
        _ => None,
    };

    let device = Device::open(HidApiTransport::new()?, settings)?;
    println!(
        "[HF] Device is in {} mode.",
        style(device.mode()).cyan()
    );

    match matches.subcommand() {
        ("mode", Some(sub)) => {
            let target = value_t!(sub, "MODE", DeviceMode).unwrap_or_else(|e| e.exit());
            if device.mode() == target {
                println!("[HF] Already in {} mode, skipping.", target);
                return Ok(());
            }
            match target {
                DeviceMode::Bootloader => println!("[HF] ⏩ Entering bootloader..."),
                DeviceMode::Application => println!("[HF] ⏩ Leaving bootloader..."),
            }
            let device = device.set_mode(target)?;
            println!(
                "[HF] ✅ Device is in {} mode.",
                style(device.mode()).cyan()
            );
        }
        ("flash", Some(_)) => {
            if let Some(image) = image {
                println!("[HF] Loaded {}", image);
                let device = hf::flash_firmware(device, &image)?;
                println!(
                    "[HF] ✅ Flashed, device is in {} mode.",
                    style(device.mode()).cyan()
                );
            }
        }
        _ => {}
    }

    Ok(())
}

fn load_image(source: &str) -> hf::Result<FlashImage> {
    if source == "-" {
        let mut text = String::new();
        io::stdin().read_to_string(&mut text)?;
        FlashImage::from_ihex(&text)
    } else {
        FlashImage::load(source)
    }
}

/// Parses a decimal or `0x` prefixed hexadecimal number.
fn parse_number(value: &str) -> Result<u32, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse::<u32>(),
    };
    parsed.map_err(|e| format!("`{}` is not a valid number: {}", value, e))
}

fn report_id(value: u32) -> Result<u8, String> {
    if value > u32::from(u8::MAX) {
        return Err(format!("report ID 0x{:X} does not fit in a byte", value));
    }
    Ok(value as u8)
}
