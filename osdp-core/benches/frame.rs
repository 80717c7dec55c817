use criterion::{Criterion, black_box, criterion_group, criterion_main};
use osdp_core::{
    Command, Control, DeviceSession, IncomingMessage, PeripheralAction, PeripheralSession,
    payload::ReaderBuzzerControl,
};
use osdp_types::ToneCode;

fn buzzer() -> Command {
    Command::ReaderBuzzerControl(ReaderBuzzerControl {
        reader_number: 0,
        tone: ToneCode::Default,
        on_time: 5,
        off_time: 5,
        count: 3,
    })
}

fn bench_plain(c: &mut Criterion) {
    let command = buzzer();
    let frame = command
        .build_frame(1, Control::new(1, true, false), None)
        .unwrap();

    c.bench_function("build plain frame", |b| {
        b.iter(|| {
            command
                .build_frame(black_box(1), Control::new(1, true, false), None)
                .unwrap()
        })
    });

    c.bench_function("parse plain frame", |b| {
        b.iter(|| IncomingMessage::parse(black_box(&frame), None).unwrap())
    });
}

fn bench_secure(c: &mut Criterion) {
    let mut host = DeviceSession::new(1, true, true, None);
    let mut pd = PeripheralSession::new(1, [0; 8], None);

    let mut command = host.connect();
    loop {
        let frame = host.build_command(&command).unwrap();
        let reply = match pd.receive(&frame).unwrap() {
            PeripheralAction::Send(reply) => reply,
            other => panic!("unexpected {:?}", other),
        };
        let received = host.receive_reply(&command, &reply).unwrap().unwrap();
        host.accept_reply(&received.reply);
        match host.handle_handshake_reply(&received.reply).unwrap() {
            Some(next) => command = next,
            None => break,
        }
    }

    let buzzer = buzzer();
    c.bench_function("build secure frame", |b| {
        b.iter(|| host.build_command(black_box(&buzzer)).unwrap())
    });
}

criterion_group!(benches, bench_plain, bench_secure);
criterion_main!(benches);
